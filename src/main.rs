use anyhow::Result;
use serenity::{http::Http, model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod ui;

use crate::audio::{
    player::AudioPlayer,
    session::SessionRegistry,
    transport::{DiscordNotifier, SongbirdTransport},
};
use crate::bot::QueueBot;
use crate::config::Config;
use crate::sources::YtDlpClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voice_queue=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Voice Queue v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&Config::default()).await;
    }

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Salida de voz y avisos
    let songbird = Songbird::serenity();
    let transport = Arc::new(SongbirdTransport::new(songbird.clone()));
    let notifier = Arc::new(DiscordNotifier::new(Arc::new(Http::new(&config.discord_token))));

    // yt-dlp resuelve al encolar y descarga al reproducir
    let ytdlp = Arc::new(YtDlpClient::new(&config));

    let registry = Arc::new(SessionRegistry::new(config.max_queue_size, config.history_size));
    let player = AudioPlayer::new(
        registry,
        ytdlp.clone(),
        ytdlp,
        transport,
        notifier.clone(),
        config.queue_page_size,
    );

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;
    let handler = QueueBot::new(config.clone(), player.clone(), notifier);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        player.shutdown();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check(config: &Config) -> Result<()> {
    let ytdlp_path = std::env::var("YTDLP_PATH").unwrap_or_else(|_| config.ytdlp_path.clone());

    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new(&ytdlp_path)
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
