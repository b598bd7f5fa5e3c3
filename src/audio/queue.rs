use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{collections::VecDeque, fmt, str::FromStr};
use tracing::{debug, info};

use crate::error::QueueError;

/// Canción tal como la pidió el usuario. Se convierte en audio reproducible
/// recién cuando el loop de avance llega a ella.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    /// Búsqueda o enlace que recibe el fetcher
    pub query: String,
    /// Nombre legible conocido al resolver (entradas de playlist)
    pub label: Option<String>,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl TrackRequest {
    pub fn new(query: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            query: query.into(),
            label: None,
            requested_by,
            added_at: Utc::now(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn display(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.query)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    Song,
    Queue,
}

impl FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "off" | "none" => Ok(LoopMode::Off),
            "song" | "track" => Ok(LoopMode::Song),
            "queue" => Ok(LoopMode::Queue),
            other => Err(format!("Invalid loop mode: {}", other)),
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopMode::Off => "off",
            LoopMode::Song => "song",
            LoopMode::Queue => "queue",
        };
        f.write_str(name)
    }
}

/// Cola ordenada de una guild.
///
/// Se guarda como dos secuencias: `played` (lo que el cursor ya pasó; el
/// último elemento es la canción actual) y `pending` (lo que falta). La
/// posición del cursor es `played.len()`. `history` es la pila acotada que
/// alimenta [`MusicQueue::next_track`] y limita cuánto se puede retroceder.
#[derive(Debug)]
pub struct MusicQueue {
    played: Vec<TrackRequest>,
    pending: VecDeque<TrackRequest>,
    history: VecDeque<TrackRequest>,
    loop_mode: LoopMode,
    max_size: usize,
    max_history: usize,
}

impl MusicQueue {
    pub fn new(max_size: usize, max_history: usize) -> Self {
        Self {
            played: Vec::new(),
            pending: VecDeque::new(),
            history: VecDeque::with_capacity(max_history),
            loop_mode: LoopMode::Off,
            max_size,
            max_history,
        }
    }

    /// Agrega al final sin mover el cursor.
    ///
    /// Sólo toma las canciones que caben bajo el límite y devuelve cuántas
    /// se agregaron.
    pub fn add(&mut self, items: impl IntoIterator<Item = TrackRequest>) -> usize {
        let available = self.max_size.saturating_sub(self.total_len());
        let before = self.pending.len();
        self.pending.extend(items.into_iter().take(available));

        let added = self.pending.len() - before;
        info!("➕ {} canción(es) agregada(s) a la cola", added);
        added
    }

    /// Avanza el cursor y devuelve la canción a reproducir.
    ///
    /// - `Song`: repite la actual sin tocar cursor ni historial.
    /// - Si no, la primera pendiente pasa a ser la actual y entra al historial.
    /// - `Queue`: cuando no queda nada pendiente, toda la lista vuelve a
    ///   quedar pendiente y se devuelve la primera.
    pub fn next_track(&mut self) -> Option<TrackRequest> {
        if self.loop_mode == LoopMode::Song {
            if let Some(current) = self.played.last() {
                info!("🔂 Repitiendo: {}", current.display());
                return Some(current.clone());
            }
        }

        if let Some(item) = self.advance_cursor() {
            return Some(item);
        }

        if self.loop_mode == LoopMode::Queue && !self.played.is_empty() {
            info!("🔁 Fin de la cola, volviendo al inicio");
            let played = std::mem::take(&mut self.played);
            self.pending.extend(played);
            return self.advance_cursor();
        }

        info!("📭 Cola terminada");
        None
    }

    /// Retrocede el cursor y devuelve la canción que sonará en el próximo
    /// [`MusicQueue::next_track`].
    ///
    /// Retrocede dos pasos (la actual y la anterior) cuando hay una canción
    /// anterior en la lista y en el historial; si no, uno solo y la actual
    /// vuelve a empezar. El resultado es siempre lo que quedó al frente de
    /// `pending`, así que coincide con lo que se reproduce después aunque
    /// un loop de cola o un `remove` hayan cambiado la lista.
    pub fn previous(&mut self) -> Result<TrackRequest, QueueError> {
        if self.history.is_empty() || self.played.is_empty() {
            return Err(QueueError::NoPrevious);
        }

        self.history.pop_back();
        let steps = if self.played.len() >= 2 && self.history.pop_back().is_some() {
            2
        } else {
            1
        };

        for _ in 0..steps {
            if let Some(item) = self.played.pop() {
                self.pending.push_front(item);
            }
        }

        let target = self.pending.front().cloned().ok_or(QueueError::NoPrevious)?;
        debug!("⏮️ Cursor en {}: {}", self.position(), target.display());
        Ok(target)
    }

    pub fn current_song(&self) -> Option<&TrackRequest> {
        self.played.last()
    }

    pub fn clear(&mut self) {
        self.played.clear();
        self.pending.clear();
        self.history.clear();
        info!("🗑️ Cola limpiada");
    }

    /// Quita la canción en `index` de la lista completa (primero las ya
    /// reproducidas).
    pub fn remove(&mut self, index: usize) -> Result<TrackRequest, QueueError> {
        let len = self.total_len();
        let played = self.played.len();

        let removed = if index < played {
            Some(self.played.remove(index))
        } else {
            self.pending.remove(index - played)
        };

        let removed = removed.ok_or(QueueError::IndexOutOfRange { index, len })?;
        debug!("❌ Eliminada posición {}: {}", index, removed.display());
        Ok(removed)
    }

    /// Mezcla sólo las pendientes; las ya reproducidas mantienen su orden.
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.pending.make_contiguous().shuffle(&mut rng);
        info!("🔀 {} canción(es) pendiente(s) mezclada(s)", self.pending.len());
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
        match mode {
            LoopMode::Off => info!("➡️ Repetición desactivada"),
            LoopMode::Song => info!("🔂 Repetir canción activado"),
            LoopMode::Queue => info!("🔁 Repetir cola activado"),
        }
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    /// Canciones que faltan por sonar
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn position(&self) -> usize {
        self.played.len()
    }

    pub fn total_len(&self) -> usize {
        self.played.len() + self.pending.len()
    }

    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Todas las canciones en orden, primero las reproducidas
    #[cfg(test)]
    pub fn tracks(&self) -> impl Iterator<Item = &TrackRequest> {
        self.played.iter().chain(self.pending.iter())
    }

    pub fn snapshot(&self, page_size: usize) -> QueueSnapshot {
        let position = self.position();
        QueueSnapshot {
            current: self.current_song().cloned(),
            upcoming: self
                .pending
                .iter()
                .take(page_size)
                .enumerate()
                .map(|(offset, item)| (position + offset + 1, item.clone()))
                .collect(),
            pending: self.pending.len(),
            loop_mode: self.loop_mode,
        }
    }

    fn advance_cursor(&mut self) -> Option<TrackRequest> {
        let item = self.pending.pop_front()?;
        self.played.push(item.clone());
        self.add_to_history(item.clone());
        debug!("➡️ Cursor en {}: {}", self.position(), item.display());
        Some(item)
    }

    fn add_to_history(&mut self, item: TrackRequest) {
        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        if self.max_history > 0 {
            self.history.push_back(item);
        }
    }
}

/// Vista de sólo lectura para `/queue`
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub current: Option<TrackRequest>,
    /// Próximas canciones con su índice absoluto (desde 1) en la lista
    pub upcoming: Vec<(usize, TrackRequest)>,
    pub pending: usize,
    pub loop_mode: LoopMode,
}

impl QueueSnapshot {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.upcoming.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn queue_of(names: &[&str]) -> MusicQueue {
        let mut queue = MusicQueue::new(100, 50);
        queue.add(names.iter().map(|n| TrackRequest::new(*n, UserId::new(1))));
        queue
    }

    fn next(queue: &mut MusicQueue) -> Option<String> {
        queue.next_track().map(|t| t.query)
    }

    fn names(queue: &MusicQueue) -> Vec<String> {
        queue.tracks().map(|t| t.query.clone()).collect()
    }

    #[test]
    fn test_next_returns_each_track_once_in_order() {
        let mut queue = queue_of(&["A", "B", "C"]);

        assert_eq!(next(&mut queue), Some("A".into()));
        assert_eq!(next(&mut queue), Some("B".into()));
        assert_eq!(next(&mut queue), Some("C".into()));
        assert_eq!(next(&mut queue), None);
        assert_eq!(next(&mut queue), None);
        assert_eq!(queue.position(), 3);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_add_keeps_cursor() {
        let mut queue = queue_of(&["A"]);
        next(&mut queue);

        queue.add([TrackRequest::new("B", UserId::new(2))]);

        assert_eq!(queue.position(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.current_song().map(|t| t.query.as_str()), Some("A"));
    }

    #[test]
    fn test_add_respects_size_cap() {
        let mut queue = MusicQueue::new(2, 50);
        let added = queue.add(["A", "B", "C"].map(|n| TrackRequest::new(n, UserId::new(1))));

        assert_eq!(added, 2);
        assert_eq!(names(&queue), vec!["A", "B"]);
    }

    #[test]
    fn test_song_loop_repeats_without_mutation() {
        let mut queue = queue_of(&["A", "B"]);
        next(&mut queue);
        queue.set_loop_mode(LoopMode::Song);

        for _ in 0..5 {
            assert_eq!(next(&mut queue), Some("A".into()));
        }
        assert_eq!(queue.position(), 1);
        assert_eq!(queue.history_len(), 1);
    }

    #[test]
    fn test_song_loop_without_current_starts_from_top() {
        let mut queue = queue_of(&["A", "B"]);
        queue.set_loop_mode(LoopMode::Song);

        assert_eq!(next(&mut queue), Some("A".into()));
        assert_eq!(next(&mut queue), Some("A".into()));
    }

    #[test]
    fn test_queue_loop_wraps_indefinitely() {
        let mut queue = queue_of(&["A", "B"]);
        queue.set_loop_mode(LoopMode::Queue);

        let played: Vec<_> = (0..6).filter_map(|_| next(&mut queue)).collect();

        assert_eq!(played, vec!["A", "B", "A", "B", "A", "B"]);
        assert_eq!(queue.position(), 2);
        assert_eq!(queue.total_len(), 2);
    }

    #[test]
    fn test_queue_loop_on_empty_queue_returns_none() {
        let mut queue = queue_of(&[]);
        queue.set_loop_mode(LoopMode::Queue);
        assert_eq!(next(&mut queue), None);
    }

    #[test]
    fn test_previous_then_next_replays_prior_track() {
        let mut queue = queue_of(&["A", "B", "C"]);

        assert_eq!(next(&mut queue), Some("A".into()));
        assert_eq!(next(&mut queue), Some("B".into()));
        assert_eq!(queue.previous().map(|t| t.query), Ok("A".into()));
        assert_eq!(queue.position(), 0);
        assert_eq!(next(&mut queue), Some("A".into()));
        assert_eq!(next(&mut queue), Some("B".into()));
        assert_eq!(next(&mut queue), Some("C".into()));
    }

    #[test]
    fn test_previous_walks_back_repeatedly() {
        let mut queue = queue_of(&["A", "B", "C"]);
        for _ in 0..3 {
            next(&mut queue);
        }

        assert_eq!(queue.previous().map(|t| t.query), Ok("B".into()));
        assert_eq!(queue.previous().map(|t| t.query), Ok("A".into()));
        assert_eq!(queue.position(), 0);
        assert_eq!(next(&mut queue), Some("A".into()));
    }

    #[test]
    fn test_previous_with_single_entry_restarts_current() {
        let mut queue = queue_of(&["A", "B"]);
        next(&mut queue);

        assert_eq!(queue.previous().map(|t| t.query), Ok("A".into()));
        assert_eq!(queue.position(), 0);
        assert_eq!(next(&mut queue), Some("A".into()));
    }

    #[test]
    fn test_previous_after_queue_wrap_matches_replayed_track() {
        let mut queue = queue_of(&["A", "B"]);
        queue.set_loop_mode(LoopMode::Queue);
        for expected in ["A", "B", "A"] {
            assert_eq!(next(&mut queue), Some(expected.into()));
        }

        let target = queue.previous().map(|t| t.query);

        assert_eq!(target, Ok("A".into()));
        assert_eq!(next(&mut queue), Some("A".into()));
        assert_eq!(next(&mut queue), Some("B".into()));
    }

    #[test]
    fn test_previous_after_removing_played_track_matches_replayed_track() {
        let mut queue = queue_of(&["A", "B", "C", "D"]);
        for _ in 0..3 {
            next(&mut queue);
        }
        assert_eq!(queue.remove(1).map(|t| t.query), Ok("B".into()));

        let target = queue.previous().map(|t| t.query);

        assert_eq!(target, Ok("A".into()));
        assert_eq!(next(&mut queue), Some("A".into()));
        assert_eq!(next(&mut queue), Some("C".into()));
    }

    #[test]
    fn test_previous_after_removing_every_played_track() {
        let mut queue = queue_of(&["A", "B"]);
        next(&mut queue);
        queue.remove(0).unwrap();

        assert_eq!(queue.previous(), Err(QueueError::NoPrevious));
        assert_eq!(names(&queue), vec!["B"]);
    }

    #[test]
    fn test_previous_with_empty_history_changes_nothing() {
        let mut queue = queue_of(&["A", "B"]);

        assert_eq!(queue.previous(), Err(QueueError::NoPrevious));
        assert_eq!(queue.position(), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(names(&queue), vec!["A", "B"]);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut queue = MusicQueue::new(200, 50);
        queue.add((0..60).map(|i| TrackRequest::new(i.to_string(), UserId::new(1))));
        while queue.next_track().is_some() {}

        assert_eq!(queue.history_len(), 50);
    }

    #[test]
    fn test_remove_before_cursor_shifts_position() {
        let mut queue = queue_of(&["A", "B", "C", "D"]);
        next(&mut queue);
        next(&mut queue);

        let removed = queue.remove(0).map(|t| t.query);

        assert_eq!(removed, Ok("A".into()));
        assert_eq!(queue.position(), 1);
        assert_eq!(queue.current_song().map(|t| t.query.as_str()), Some("B"));
        assert_eq!(next(&mut queue), Some("C".into()));
    }

    #[test]
    fn test_remove_at_or_after_cursor_keeps_position() {
        let mut queue = queue_of(&["A", "B", "C", "D"]);
        next(&mut queue);

        assert_eq!(queue.remove(1).map(|t| t.query), Ok("B".into()));
        assert_eq!(queue.position(), 1);
        assert_eq!(queue.remove(2).map(|t| t.query), Ok("D".into()));
        assert_eq!(queue.position(), 1);
        assert_eq!(names(&queue), vec!["A", "C"]);
    }

    #[test]
    fn test_remove_out_of_range_is_rejected() {
        let mut queue = queue_of(&["A", "B"]);
        next(&mut queue);

        assert_eq!(
            queue.remove(2),
            Err(QueueError::IndexOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(queue.position(), 1);
        assert_eq!(names(&queue), vec!["A", "B"]);
    }

    #[test]
    fn test_shuffle_only_touches_upcoming() {
        let all: Vec<String> = (0..30).map(|i| format!("t{}", i)).collect();
        let refs: Vec<&str> = all.iter().map(String::as_str).collect();
        let mut queue = queue_of(&refs);
        for _ in 0..10 {
            next(&mut queue);
        }

        queue.shuffle();

        let after = names(&queue);
        assert_eq!(&after[..10], &all[..10]);
        let mut upcoming = after[10..].to_vec();
        upcoming.sort();
        let mut expected = all[10..].to_vec();
        expected.sort();
        assert_eq!(upcoming, expected);
        assert_eq!(queue.position(), 10);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut queue = queue_of(&["A", "B"]);
        next(&mut queue);
        queue.clear();

        assert_eq!(queue.position(), 0);
        assert_eq!(queue.total_len(), 0);
        assert_eq!(queue.history_len(), 0);
        assert!(queue.current_song().is_none());
        assert_eq!(queue.previous(), Err(QueueError::NoPrevious));
    }

    #[test]
    fn test_snapshot_numbers_upcoming_by_absolute_index() {
        let mut queue = queue_of(&["A", "B", "C", "D"]);
        next(&mut queue);

        let snapshot = queue.snapshot(2);

        assert_eq!(snapshot.current.map(|t| t.query), Some("A".into()));
        let upcoming: Vec<_> = snapshot
            .upcoming
            .into_iter()
            .map(|(i, t)| (i, t.query))
            .collect();
        assert_eq!(upcoming, vec![(2, "B".to_string()), (3, "C".to_string())]);
        assert_eq!(snapshot.pending, 3);
    }

    #[test]
    fn test_loop_mode_parsing() {
        assert_eq!("song".parse::<LoopMode>(), Ok(LoopMode::Song));
        assert_eq!("Queue".parse::<LoopMode>(), Ok(LoopMode::Queue));
        assert_eq!("off".parse::<LoopMode>(), Ok(LoopMode::Off));
        assert!("forever".parse::<LoopMode>().is_err());
    }

    #[test]
    fn test_display_prefers_label() {
        let track = TrackRequest::new("https://youtu.be/x", UserId::new(1)).with_label("Song X");
        assert_eq!(track.display(), "Song X");
        assert_eq!(TrackRequest::new("query", UserId::new(1)).display(), "query");
    }
}
