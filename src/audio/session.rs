use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serenity::model::id::GuildId;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    audio::queue::MusicQueue,
    error::{PlayerError, Result},
};

/// Estado que comparten los comandos y el loop de avance de una guild.
///
/// Toda lectura o escritura de la cola pasa por [`Session::state`] y el lock
/// nunca se mantiene a través de un `.await`.
#[derive(Debug)]
pub struct SessionState {
    pub queue: MusicQueue,
    /// Hay una tarea de avance a cargo de la sesión
    driving: bool,
    /// Lo incrementan stop/clear/previous: una descarga que termina después
    /// se descarta en vez de reproducirse
    generation: u64,
}

impl SessionState {
    fn new(queue: MusicQueue) -> Self {
        Self {
            queue,
            driving: false,
            generation: 0,
        }
    }

    pub fn is_driving(&self) -> bool {
        self.driving
    }

    /// Toma el puesto de driver. Devuelve false si ya hay uno corriendo.
    pub fn begin_driving(&mut self) -> bool {
        !std::mem::replace(&mut self.driving, true)
    }

    pub fn end_driving(&mut self) {
        self.driving = false;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn invalidate_in_flight(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Exclusión mutua de los ciclos de avance de una sesión.
///
/// Además del mutex se cuentan los poseedores; más de uno a la vez es una
/// violación y se reporta como [`PlayerError::GuardViolation`]. El permiso
/// es dueño de su lock, así que puede acompañar a la reproducción hasta que
/// termina.
#[derive(Debug, Default)]
pub struct AdvanceGuard {
    lock: Arc<tokio::sync::Mutex<()>>,
    holders: Arc<AtomicUsize>,
    peak: AtomicUsize,
}

#[derive(Debug)]
pub struct AdvancePermit {
    _lock: OwnedMutexGuard<()>,
    holders: Arc<AtomicUsize>,
}

impl Drop for AdvancePermit {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AdvanceGuard {
    /// Espera a que ningún otro avance tenga el guard.
    pub async fn acquire(&self, session: GuildId) -> Result<AdvancePermit> {
        let lock = self.lock.clone().lock_owned().await;
        let holders = self.holders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(holders, Ordering::SeqCst);

        if holders > 1 {
            self.holders.fetch_sub(1, Ordering::SeqCst);
            error!("🚨 {} avances simultáneos en guild {}", holders, session);
            return Err(PlayerError::GuardViolation { session });
        }

        Ok(AdvancePermit {
            _lock: lock,
            holders: self.holders.clone(),
        })
    }

    pub fn holders(&self) -> usize {
        self.holders.load(Ordering::SeqCst)
    }

    /// Máximo de poseedores simultáneos observado
    #[cfg(test)]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Session {
    id: GuildId,
    state: Mutex<SessionState>,
    guard: AdvanceGuard,
    shutdown: CancellationToken,
}

impl Session {
    fn new(id: GuildId, queue: MusicQueue) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState::new(queue)),
            guard: AdvanceGuard::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> GuildId {
        self.id
    }

    pub fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    pub fn guard(&self) -> &AdvanceGuard {
        &self.guard
    }

    /// Se cancela cuando el bot se apaga
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// Una [`Session`] por guild, creada en el primer uso.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<Session>>,
    max_queue_size: usize,
    max_history: usize,
}

impl SessionRegistry {
    pub fn new(max_queue_size: usize, max_history: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_queue_size,
            max_history,
        }
    }

    pub fn get_or_create(&self, id: GuildId) -> Arc<Session> {
        self.sessions
            .entry(id)
            .or_insert_with(|| {
                info!("🆕 Nueva sesión para guild {}", id);
                Arc::new(Session::new(
                    id,
                    MusicQueue::new(self.max_queue_size, self.max_history),
                ))
            })
            .clone()
    }

    pub fn get(&self, id: GuildId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| s.clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Cancela el driver de cada sesión
    pub fn shutdown(&self) {
        for session in self.sessions.iter() {
            session.shutdown.cancel();
        }
        info!("🛑 {} sesión(es) cerradas", self.sessions.len());
    }
}
