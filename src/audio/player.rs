use serenity::model::id::{GuildId, UserId};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        queue::{LoopMode, QueueSnapshot, TrackRequest},
        session::{AdvancePermit, Session, SessionRegistry},
        transport::{Completion, CompletionSignal, Notifier, PlaybackTransport},
    },
    error::{ResolutionError, Result, TransportError},
    sources::{AudioResource, Fetcher, Resolver},
};

/// Resultado de un paso de avance
#[derive(Debug)]
pub enum Advance {
    /// Hay una canción sonando; la cadena sigue cuando llega `completion`
    Playing(ActivePlayback),
    /// No queda nada. La cadena termina hasta el próximo add
    Finished,
}

/// Reproducción en curso. Mientras exista, el guard de avance de la sesión
/// sigue tomado.
#[derive(Debug)]
pub struct ActivePlayback {
    pub title: String,
    pub resource: AudioResource,
    pub completion: oneshot::Receiver<Completion>,
    pub permit: AdvancePermit,
}

#[derive(Debug)]
pub struct Enqueued {
    /// Canciones realmente agregadas (la cola puede estar cerca del límite)
    pub tracks: Vec<TrackRequest>,
    /// Esta llamada arrancó el loop de avance
    pub started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOutcome {
    Skipped,
    NothingPlaying,
    QueueEmpty,
}

/// Reproductor de todas las guilds.
///
/// Cada guild tiene como mucho una tarea driver. El driver ejecuta
/// [`AudioPlayer::advance_once`], espera la señal de fin del transporte y
/// repite hasta agotar la cola. Los comandos tocan la cola sólo a través del
/// lock de la sesión y del transporte; saltar o detener termina la
/// reproducción actual y eso despierta al driver.
#[derive(Clone)]
pub struct AudioPlayer {
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn Resolver>,
    fetcher: Arc<dyn Fetcher>,
    transport: Arc<dyn PlaybackTransport>,
    notifier: Arc<dyn Notifier>,
    page_size: usize,
}

impl AudioPlayer {
    pub fn new(
        registry: Arc<SessionRegistry>,
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn Fetcher>,
        transport: Arc<dyn PlaybackTransport>,
        notifier: Arc<dyn Notifier>,
        page_size: usize,
    ) -> Self {
        Self {
            registry,
            resolver,
            fetcher,
            transport,
            notifier,
            page_size,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Resuelve `query`, agrega las canciones y arranca el loop de avance si
    /// la guild está inactiva.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        query: &str,
        requested_by: UserId,
    ) -> Result<Enqueued> {
        let resolved = self.resolver.resolve(query).await?;
        if resolved.is_empty() {
            return Err(ResolutionError::NoResults(query.to_string()).into());
        }

        let requests: Vec<TrackRequest> = resolved
            .into_iter()
            .map(|track| {
                let request = TrackRequest::new(track.query, requested_by);
                match track.label {
                    Some(label) => request.with_label(label),
                    None => request,
                }
            })
            .collect();

        let session = self.registry.get_or_create(guild_id);
        let (added, claimed) = {
            let mut state = session.state();
            let added = state.queue.add(requests.iter().cloned());
            (added, added > 0 && state.begin_driving())
        };

        if claimed {
            self.spawn_driver(session);
        }

        Ok(Enqueued {
            tracks: requests.into_iter().take(added).collect(),
            started: claimed,
        })
    }

    /// Arranca el loop de avance salvo que ya haya uno corriendo
    pub fn start_if_idle(&self, session: &Arc<Session>) -> bool {
        let claimed = session.state().begin_driving();
        if claimed {
            self.spawn_driver(session.clone());
        }
        claimed
    }

    fn spawn_driver(&self, session: Arc<Session>) {
        let player = self.clone();
        tokio::spawn(async move {
            player.drive(session).await;
        });
    }

    async fn drive(&self, session: Arc<Session>) {
        let guild_id = session.id();
        info!("▶️ Loop de avance iniciado en guild {}", guild_id);

        loop {
            // El permiso vive hasta liberar el recurso
            let ActivePlayback {
                title,
                resource,
                completion,
                permit: _permit,
            } = match self.advance_once(&session).await {
                Ok(Advance::Playing(playback)) => playback,
                Ok(Advance::Finished) => break,
                Err(e) => {
                    error!("❌ Loop de avance abortado en guild {}: {}", guild_id, e);
                    session.state().end_driving();
                    break;
                }
            };

            let outcome = tokio::select! {
                outcome = completion => outcome.unwrap_or(Some(TransportError::CompletionDropped)),
                _ = session.shutdown_token().cancelled() => {
                    let _ = self.transport.stop(guild_id).await;
                    self.fetcher.release(&resource).await;
                    session.state().end_driving();
                    info!("🛑 Loop de avance cancelado en guild {}", guild_id);
                    return;
                }
            };

            match outcome {
                None => debug!("🎵 '{}' terminó en guild {}", title, guild_id),
                Some(e) => {
                    warn!("⚠️ Falló la reproducción de '{}' en guild {}: {}", title, guild_id, e);
                    self.notifier
                        .send_status(guild_id, &format!("Playback error: {}", e))
                        .await;
                }
            }

            self.fetcher.release(&resource).await;
        }

        info!("⏹️ Loop de avance terminado en guild {}", guild_id);
    }

    /// Elige la siguiente canción, la descarga y la empieza a reproducir bajo
    /// el guard de avance de la sesión. El guard queda tomado dentro de la
    /// [`ActivePlayback`] devuelta.
    ///
    /// Las canciones que no se pueden descargar o iniciar se avisan y se
    /// saltan. Sin loop, la cola simplemente se agota. En loop de cola se
    /// abandona tras tantos fallos seguidos como canciones tenga la cola, y en
    /// loop de canción al primer fallo.
    pub async fn advance_once(&self, session: &Session) -> Result<Advance> {
        let guild_id = session.id();
        let permit = session.guard().acquire(guild_id).await?;
        let mut failures = 0usize;

        loop {
            let (next, generation, budget, loop_mode) = {
                let mut state = session.state();
                let next = state.queue.next_track();
                if next.is_none() {
                    state.end_driving();
                }
                (
                    next,
                    state.generation(),
                    state.queue.total_len().max(1),
                    state.queue.loop_mode(),
                )
            };

            let Some(track) = next else {
                self.notifier.send_status(guild_id, "Queue finished").await;
                return Ok(Advance::Finished);
            };

            let fetched = match self.fetcher.fetch(&track).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!("❌ No se pudo descargar '{}': {}", track.display(), e);
                    self.notifier
                        .send_status(guild_id, &format!("Failed to download: {}", track.display()))
                        .await;
                    failures += 1;
                    if exhausted(loop_mode, failures, budget) {
                        return Ok(self.give_up(session).await);
                    }
                    continue;
                }
            };

            if session.state().generation() != generation {
                info!("🗑️ Descartando '{}': la cola cambió durante la descarga", fetched.title);
                self.fetcher.release(&fetched.resource).await;
                continue;
            }

            let (signal, completion) = CompletionSignal::channel();
            if let Err(e) = self.transport.play(guild_id, &fetched.resource, signal).await {
                warn!("❌ No se pudo iniciar '{}': {}", fetched.title, e);
                self.notifier
                    .send_status(guild_id, &format!("Playback error: {}", e))
                    .await;
                self.fetcher.release(&fetched.resource).await;
                failures += 1;
                if exhausted(loop_mode, failures, budget) {
                    return Ok(self.give_up(session).await);
                }
                continue;
            }

            if session.state().generation() != generation {
                // Stop/clear llegó mientras el transporte arrancaba
                let _ = self.transport.stop(guild_id).await;
            } else {
                info!("🎵 Reproduciendo en guild {}: {}", guild_id, fetched.title);
                self.notifier
                    .send_status(guild_id, &format!("Now playing: **{}**", fetched.title))
                    .await;
            }

            return Ok(Advance::Playing(ActivePlayback {
                title: fetched.title,
                resource: fetched.resource,
                completion,
                permit,
            }));
        }
    }

    async fn give_up(&self, session: &Session) -> Advance {
        session.state().end_driving();
        warn!("🚫 Demasiados fallos en guild {}, deteniendo", session.id());
        self.notifier
            .send_status(session.id(), "Stopped after repeated failures")
            .await;
        Advance::Finished
    }

    pub fn snapshot(&self, guild_id: GuildId) -> QueueSnapshot {
        self.registry
            .get_or_create(guild_id)
            .state()
            .queue
            .snapshot(self.page_size)
    }

    async fn is_active(&self, guild_id: GuildId) -> bool {
        self.transport.is_playing(guild_id).await || self.transport.is_paused(guild_id).await
    }

    /// Termina la canción actual; el loop de avance sigue solo
    pub async fn skip(&self, guild_id: GuildId) -> Result<SkipOutcome> {
        if !self.is_active(guild_id).await {
            return Ok(SkipOutcome::NothingPlaying);
        }
        self.transport.stop(guild_id).await?;
        info!("⏭️ Canción saltada en guild {}", guild_id);
        Ok(SkipOutcome::Skipped)
    }

    /// Como [`AudioPlayer::skip`], pero no hace nada si no hay canciones
    /// después de la actual.
    pub async fn next(&self, guild_id: GuildId) -> Result<SkipOutcome> {
        if self.registry.get_or_create(guild_id).state().queue.is_empty() {
            return Ok(SkipOutcome::QueueEmpty);
        }
        self.skip(guild_id).await
    }

    /// Retrocede la cola y devuelve la canción que suena a continuación
    pub async fn previous(&self, guild_id: GuildId) -> Result<TrackRequest> {
        let session = self.registry.get_or_create(guild_id);
        let target = {
            let mut state = session.state();
            let target = state.queue.previous()?;
            state.invalidate_in_flight();
            target
        };

        if self.is_active(guild_id).await {
            self.transport.stop(guild_id).await?;
        } else {
            self.start_if_idle(&session);
        }

        info!("⏮️ Volviendo a '{}' en guild {}", target.display(), guild_id);
        Ok(target)
    }

    pub fn remove(&self, guild_id: GuildId, index: usize) -> Result<TrackRequest> {
        let session = self.registry.get_or_create(guild_id);
        let removed = session.state().queue.remove(index)?;
        Ok(removed)
    }

    pub fn clear(&self, guild_id: GuildId) {
        let session = self.registry.get_or_create(guild_id);
        let mut state = session.state();
        state.queue.clear();
        state.invalidate_in_flight();
    }

    pub fn set_loop_mode(&self, guild_id: GuildId, mode: LoopMode) {
        self.registry
            .get_or_create(guild_id)
            .state()
            .queue
            .set_loop_mode(mode);
    }

    pub fn shuffle(&self, guild_id: GuildId) {
        self.registry.get_or_create(guild_id).state().queue.shuffle();
    }

    /// Limpia la cola y termina la reproducción actual. Devuelve si había
    /// algo sonando.
    pub async fn stop(&self, guild_id: GuildId) -> Result<bool> {
        self.clear(guild_id);
        if !self.is_active(guild_id).await {
            return Ok(false);
        }
        self.transport.stop(guild_id).await?;
        Ok(true)
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<bool> {
        if !self.transport.is_playing(guild_id).await {
            return Ok(false);
        }
        self.transport.pause(guild_id).await?;
        Ok(true)
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<bool> {
        if !self.transport.is_paused(guild_id).await {
            return Ok(false);
        }
        self.transport.resume(guild_id).await?;
        Ok(true)
    }

    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

/// Sin loop la cola se agota sola, así que no hay límite de fallos
fn exhausted(loop_mode: LoopMode, failures: usize, budget: usize) -> bool {
    match loop_mode {
        LoopMode::Off => false,
        LoopMode::Song => true,
        LoopMode::Queue => failures >= budget,
    }
}
