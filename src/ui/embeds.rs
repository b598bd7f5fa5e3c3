use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::audio::{
    player::Enqueued,
    queue::{LoopMode, QueueSnapshot, TrackRequest},
};

pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Voice Queue";

/// Embed de respuesta para `/play`
pub fn create_track_added_embed(enqueued: &Enqueued) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    match enqueued.tracks.as_slice() {
        [track] => embed
            .title("✅ Added to queue")
            .description(format!("Added to queue: **{}**", track.display()))
            .field("👤 Requested by", format!("<@{}>", track.requested_by), true),
        tracks => embed
            .title("✅ Playlist added")
            .description(format!("Added {} tracks to queue", tracks.len())),
    }
}

pub fn create_queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Queue")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now());

    if snapshot.is_empty() {
        return embed
            .description("Queue is empty\n\n💡 Use `/play <song>` to add music")
            .color(colors::NEUTRAL_GRAY);
    }

    let mut embed = embed;

    if let Some(current) = &snapshot.current {
        embed = embed.field(
            format!("{} Now playing", loop_icon(snapshot.loop_mode)),
            format!("**{}**", current.display()),
            false,
        );
    }

    if !snapshot.upcoming.is_empty() {
        embed = embed.field("Up next", upcoming_lines(&snapshot.upcoming), false);
    }

    let mut info = format!("**Pending:** {} tracks", snapshot.pending);
    if snapshot.pending > snapshot.upcoming.len() {
        info.push_str(&format!(
            " ({} not shown)",
            snapshot.pending - snapshot.upcoming.len()
        ));
    }
    info.push_str(&format!("\n**Loop:** {}", snapshot.loop_mode));

    embed.field("ℹ️ Info", info, false)
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
}

fn loop_icon(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Song => "🔂",
        LoopMode::Queue => "🔁",
        LoopMode::Off => "▶️",
    }
}

/// Una línea por canción, numerada por su posición absoluta en la cola
fn upcoming_lines(upcoming: &[(usize, TrackRequest)]) -> String {
    upcoming
        .iter()
        .map(|(index, track)| format!("**{}**. {}\n", index, track.display()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::MusicQueue;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn snapshot_of(names: &[&str], advance: usize, page_size: usize) -> QueueSnapshot {
        let mut queue = MusicQueue::new(100, 50);
        queue.add(names.iter().map(|n| TrackRequest::new(*n, UserId::new(1))));
        for _ in 0..advance {
            queue.next_track();
        }
        queue.snapshot(page_size)
    }

    #[test]
    fn test_upcoming_lines_use_absolute_positions() {
        let snapshot = snapshot_of(&["a", "b", "c", "d"], 2, 10);
        assert_eq!(upcoming_lines(&snapshot.upcoming), "**3**. c\n**4**. d\n");
    }

    #[test]
    fn test_queue_embed_for_empty_queue() {
        let embed = create_queue_embed(&snapshot_of(&[], 0, 10));
        let json = serde_json::to_value(&embed).unwrap();
        assert!(json["description"]
            .as_str()
            .unwrap()
            .starts_with("Queue is empty"));
    }

    #[test]
    fn test_queue_embed_reports_hidden_tracks() {
        let embed = create_queue_embed(&snapshot_of(&["a", "b", "c", "d"], 1, 2));
        let json = serde_json::to_value(&embed).unwrap();

        let fields = json["fields"].as_array().unwrap();
        assert_eq!(fields[0]["value"], "**a**");
        assert_eq!(fields[1]["value"], "**2**. b\n**3**. c\n");
        assert_eq!(
            fields[2]["value"],
            "**Pending:** 3 tracks (1 not shown)\n**Loop:** off"
        );
    }

    #[test]
    fn test_track_added_embed_wording() {
        let single = Enqueued {
            tracks: vec![TrackRequest::new("song", UserId::new(9)).with_label("Song Title")],
            started: true,
        };
        let json = serde_json::to_value(create_track_added_embed(&single)).unwrap();
        assert_eq!(json["description"], "Added to queue: **Song Title**");

        let playlist = Enqueued {
            tracks: vec![
                TrackRequest::new("a", UserId::new(9)),
                TrackRequest::new("b", UserId::new(9)),
            ],
            started: false,
        };
        let json = serde_json::to_value(create_track_added_embed(&playlist)).unwrap();
        assert_eq!(json["description"], "Added 2 tracks to queue");
    }
}
