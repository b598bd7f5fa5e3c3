//! # Bot Module
//!
//! Discord front end: slash command registration, command dispatch and voice
//! connection management. All queue and playback logic lives in
//! [`AudioPlayer`]; this module only translates interactions into player
//! calls and player results into replies.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use crate::{audio::player::AudioPlayer, audio::transport::DiscordNotifier, config::Config};

/// Event handler de serenity para el bot
pub struct QueueBot {
    config: Arc<Config>,
    /// Orquestador compartido con los loops de avance
    pub player: AudioPlayer,
    /// Canal de avisos, se actualiza en cada comando
    pub notifier: Arc<DiscordNotifier>,
}

impl QueueBot {
    pub fn new(config: Arc<Config>, player: AudioPlayer, notifier: Arc<DiscordNotifier>) -> Self {
        Self {
            config,
            player,
            notifier,
        }
    }

    /// Registra los comandos slash: por guild si hay `GUILD_ID` (propagación
    /// más rápida en desarrollo) y globales si no.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Entra a `channel_id`, o se mueve ahí si el bot está en otro canal de
    /// la misma guild.
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        if let Some(call) = manager.get(guild_id) {
            let current = call.lock().await.current_channel();
            if current == Some(songbird::id::ChannelId::from(channel_id)) {
                return Ok(());
            }
        }

        manager.join(guild_id, channel_id).await.map_err(|e| {
            error!("Error al conectar al canal de voz: {:?}", e);
            anyhow::anyhow!("Error al conectar al canal de voz")
        })?;

        info!("🔊 Conectado al canal {} en guild {}", channel_id, guild_id);
        Ok(())
    }

    pub async fn leave_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        if manager.get(guild_id).is_some() {
            manager.remove(guild_id).await?;
            info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for QueueBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Detiene la sesión de la guild cuando alguien desconecta al bot del
    /// canal de voz.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        let Some(guild_id) = new.guild_id else {
            return;
        };

        if self.player.registry().get(guild_id).is_none() {
            return;
        }

        info!("🔌 Bot desconectado en guild {}", guild_id);
        if let Err(e) = self.player.stop(guild_id).await {
            warn!("Error al detener reproducción: {:?}", e);
        }
    }
}
