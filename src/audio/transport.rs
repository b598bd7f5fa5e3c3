//! Salida del orquestador: el transporte de voz que reproduce un recurso y
//! avisa cuando termina, y el notifier que publica mensajes de estado.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::{
    http::Http,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    input::{File, HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{error::TransportError, sources::AudioResource};

/// `None` si terminó normalmente (o se pidió detener), `Some` si falló el stream.
pub type Completion = Option<TransportError>;

/// Se dispara una sola vez por `play`: consume `self`, y si se descarta sin
/// dispararse el receptor despierta con error.
#[derive(Debug)]
pub struct CompletionSignal(oneshot::Sender<Completion>);

impl CompletionSignal {
    pub fn channel() -> (Self, oneshot::Receiver<Completion>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn finished(self) {
        let _ = self.0.send(None);
    }

    pub fn failed(self, error: TransportError) {
        let _ = self.0.send(Some(error));
    }
}

#[async_trait]
pub trait PlaybackTransport: Send + Sync {
    /// Empieza a reproducir `resource`. `on_complete` se dispara al terminar,
    /// desde la tarea en la que el transporte procese sus eventos.
    async fn play(
        &self,
        session: GuildId,
        resource: &AudioResource,
        on_complete: CompletionSignal,
    ) -> Result<(), TransportError>;

    /// Termina la reproducción actual. Su señal de fin se dispara igual.
    async fn stop(&self, session: GuildId) -> Result<(), TransportError>;

    async fn pause(&self, session: GuildId) -> Result<(), TransportError>;

    async fn resume(&self, session: GuildId) -> Result<(), TransportError>;

    async fn is_playing(&self, session: GuildId) -> bool;

    async fn is_paused(&self, session: GuildId) -> bool;
}

/// Mensajes de estado sin garantía de entrega; los errores sólo se loguean.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_status(&self, session: GuildId, text: &str);
}

/// Reproduce a través de la llamada de songbird de cada guild
pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    http: reqwest::Client,
    current_tracks: DashMap<GuildId, TrackHandle>,
}

impl SongbirdTransport {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        Self {
            songbird,
            http: reqwest::Client::new(),
            current_tracks: DashMap::new(),
        }
    }

    fn current(&self, session: GuildId) -> Option<TrackHandle> {
        self.current_tracks.get(&session).map(|h| h.clone())
    }

    async fn play_mode(&self, session: GuildId) -> Option<PlayMode> {
        let handle = self.current(session)?;
        handle.get_info().await.ok().map(|info| info.playing)
    }

    fn input_for(&self, resource: &AudioResource) -> Input {
        match resource {
            AudioResource::File(path) => Input::from(File::new(path.clone())),
            AudioResource::Stream(url) => {
                Input::from(HttpRequest::new(self.http.clone(), url.clone()))
            }
        }
    }
}

#[async_trait]
impl PlaybackTransport for SongbirdTransport {
    async fn play(
        &self,
        session: GuildId,
        resource: &AudioResource,
        on_complete: CompletionSignal,
    ) -> Result<(), TransportError> {
        let call = self
            .songbird
            .get(session)
            .ok_or(TransportError::NotConnected)?;

        let handle = {
            let mut call = call.lock().await;
            call.play_input(self.input_for(resource))
        };

        let signal = Arc::new(Mutex::new(Some(on_complete)));
        for event in [TrackEvent::End, TrackEvent::Error] {
            let registered = handle.add_event(
                Event::Track(event),
                TrackCompletion {
                    guild_id: session,
                    signal: signal.clone(),
                },
            );
            if let Err(e) = registered {
                let _ = handle.stop();
                return Err(TransportError::Start(e.to_string()));
            }
        }

        self.current_tracks.insert(session, handle);
        Ok(())
    }

    async fn stop(&self, session: GuildId) -> Result<(), TransportError> {
        if let Some((_, handle)) = self.current_tracks.remove(&session) {
            handle
                .stop()
                .map_err(|e| TransportError::Control(e.to_string()))?;
            info!("⏹️ Reproducción detenida en guild {}", session);
        }
        Ok(())
    }

    async fn pause(&self, session: GuildId) -> Result<(), TransportError> {
        if let Some(handle) = self.current(session) {
            handle
                .pause()
                .map_err(|e| TransportError::Control(e.to_string()))?;
            info!("⏸️ Reproducción pausada en guild {}", session);
        }
        Ok(())
    }

    async fn resume(&self, session: GuildId) -> Result<(), TransportError> {
        if let Some(handle) = self.current(session) {
            handle
                .play()
                .map_err(|e| TransportError::Control(e.to_string()))?;
            info!("▶️ Reproducción reanudada en guild {}", session);
        }
        Ok(())
    }

    async fn is_playing(&self, session: GuildId) -> bool {
        matches!(self.play_mode(session).await, Some(PlayMode::Play))
    }

    async fn is_paused(&self, session: GuildId) -> bool {
        matches!(self.play_mode(session).await, Some(PlayMode::Pause))
    }
}

/// Handler para fin o error de un track: dispara la señal una sola vez
struct TrackCompletion {
    guild_id: GuildId,
    signal: Arc<Mutex<Option<CompletionSignal>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackCompletion {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let error = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(TransportError::Stream(format!("{:?}", e))),
                _ => None,
            }),
            _ => None,
        };

        if let Some(signal) = self.signal.lock().take() {
            debug!("🎵 Track terminado en guild {}", self.guild_id);
            match error {
                Some(error) => signal.failed(error),
                None => signal.finished(),
            }
        }

        None
    }
}

/// Publica los avisos en el último canal de texto donde se usó un comando
pub struct DiscordNotifier {
    http: Arc<Http>,
    channels: DashMap<GuildId, ChannelId>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            channels: DashMap::new(),
        }
    }

    pub fn bind(&self, session: GuildId, channel: ChannelId) {
        self.channels.insert(session, channel);
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send_status(&self, session: GuildId, text: &str) {
        let Some(channel) = self.channels.get(&session).map(|c| *c) else {
            debug!("Sin canal de avisos para guild {}: {}", session, text);
            return;
        };

        if let Err(e) = channel.say(&*self.http, text).await {
            warn!("No se pudo enviar aviso a guild {}: {:?}", session, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_signal_reports_outcome() {
        let (signal, rx) = CompletionSignal::channel();
        signal.finished();
        assert!(rx.await.unwrap().is_none());

        let (signal, rx) = CompletionSignal::channel();
        signal.failed(TransportError::Stream("decoder".into()));
        assert!(matches!(rx.await.unwrap(), Some(TransportError::Stream(_))));
    }

    #[tokio::test]
    async fn test_dropped_signal_wakes_receiver() {
        let (signal, rx) = CompletionSignal::channel();
        drop(signal);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_play_without_voice_connection_fails() {
        let transport = SongbirdTransport::new(Songbird::serenity());
        let (signal, _rx) = CompletionSignal::channel();

        let result = transport
            .play(
                GuildId::new(1),
                &AudioResource::Stream("https://example.com/a.mp3".into()),
                signal,
            )
            .await;

        assert!(matches!(result, Err(TransportError::NotConnected)));
        assert!(!transport.is_playing(GuildId::new(1)).await);
        assert!(transport.stop(GuildId::new(1)).await.is_ok());
    }
}
