use anyhow::Result;
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{player::SkipOutcome, queue::LoopMode},
    bot::QueueBot,
    error::{PlayerError, QueueError},
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &QueueBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(ctx, &command, "❌ This command only works in a server").await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Los avisos del reproductor van al último canal usado
    bot.notifier.bind(guild_id, command.channel_id);

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "queue" => {
            let embed = embeds::create_queue_embed(&bot.player.snapshot(guild_id));
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new().embed(embed),
                    ),
                )
                .await?;
            Ok(())
        }
        "skip" => {
            let outcome = bot.player.skip(guild_id).await?;
            respond(ctx, &command, skip_message(outcome)).await
        }
        "next" => {
            let outcome = bot.player.next(guild_id).await?;
            respond(ctx, &command, next_message(outcome)).await
        }
        "previous" => handle_previous(ctx, &command, bot, guild_id).await,
        "remove" => handle_remove(ctx, &command, bot, guild_id).await,
        "clear" => {
            bot.player.clear(guild_id);
            respond(ctx, &command, "🗑️ Queue cleared").await
        }
        "loop" => {
            let mode = option_str(&command, "mode").unwrap_or("off");
            match mode.parse::<LoopMode>() {
                Ok(mode) => {
                    bot.player.set_loop_mode(guild_id, mode);
                    respond(ctx, &command, loop_message(mode)).await
                }
                Err(_) => respond(ctx, &command, "❌ Invalid mode. Use 'song' or 'queue'").await,
            }
        }
        "shuffle" => {
            bot.player.shuffle(guild_id);
            respond(ctx, &command, "🔀 Queue shuffled").await
        }
        "stop" => {
            bot.player.stop(guild_id).await?;
            respond(ctx, &command, "⏹️ Stopped").await
        }
        "pause" => {
            let message = if bot.player.pause(guild_id).await? {
                "⏸️ Paused"
            } else {
                "❌ Nothing playing"
            };
            respond(ctx, &command, message).await
        }
        "resume" => {
            let message = if bot.player.resume(guild_id).await? {
                "▶️ Resumed"
            } else {
                "❌ Not paused"
            };
            respond(ctx, &command, message).await
        }
        "leave" => {
            bot.player.stop(guild_id).await?;
            bot.leave_voice_channel(ctx, guild_id).await?;
            respond(ctx, &command, "👋 Left the voice channel").await
        }
        _ => respond(ctx, &command, "❌ Comando no reconocido").await,
    }
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &QueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = option_str(command, "query")
        .ok_or_else(|| anyhow::anyhow!("Query no proporcionado"))?;

    let Some(voice_channel_id) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond(ctx, command, "❌ Join a voice channel first!").await;
    };

    // Resolver playlists puede tardar
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    bot.join_voice_channel(ctx, guild_id, voice_channel_id).await?;

    let response = match bot.player.enqueue(guild_id, query, command.user.id).await {
        Ok(enqueued) if enqueued.tracks.is_empty() => {
            EditInteractionResponse::new().content("❌ Queue is full")
        }
        Ok(enqueued) => EditInteractionResponse::new().embed(embeds::create_track_added_embed(&enqueued)),
        Err(e) => {
            warn!("No se pudo agregar '{}': {}", query, e);
            EditInteractionResponse::new()
                .embed(embeds::create_error_embed("Could not add to queue", &e.to_string()))
        }
    };

    command.edit_response(&ctx.http, response).await?;
    Ok(())
}

async fn handle_previous(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &QueueBot,
    guild_id: GuildId,
) -> Result<()> {
    match bot.player.previous(guild_id).await {
        Ok(track) => {
            respond(
                ctx,
                command,
                &format!("⏮️ Returning to previous song: **{}**", track.display()),
            )
            .await
        }
        Err(PlayerError::Queue(QueueError::NoPrevious)) => {
            respond(ctx, command, "❌ No previous song in history").await
        }
        Err(e) => Err(e.into()),
    }
}

async fn handle_remove(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &QueueBot,
    guild_id: GuildId,
) -> Result<()> {
    let position = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "position")
        .and_then(|opt| opt.value.as_i64())
        .unwrap_or(0);

    let removed = usize::try_from(position)
        .ok()
        .and_then(|p| p.checked_sub(1))
        .map(|index| bot.player.remove(guild_id, index));

    match removed {
        Some(Ok(track)) => {
            respond(
                ctx,
                command,
                &format!("🗑️ Removed item #{}: **{}**", position, track.display()),
            )
            .await
        }
        Some(Err(PlayerError::Queue(QueueError::IndexOutOfRange { .. }))) | None => {
            respond(ctx, command, "❌ Invalid queue position").await
        }
        Some(Err(e)) => Err(e.into()),
    }
}

// Funciones auxiliares

async fn respond(ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new().content(content),
            ),
        )
        .await?;
    Ok(())
}

fn option_str<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

fn skip_message(outcome: SkipOutcome) -> &'static str {
    match outcome {
        SkipOutcome::Skipped => "⏭️ Skipped current song",
        SkipOutcome::NothingPlaying => "❌ Nothing playing",
        SkipOutcome::QueueEmpty => "❌ Queue is empty",
    }
}

fn next_message(outcome: SkipOutcome) -> &'static str {
    match outcome {
        SkipOutcome::Skipped => "⏭️ Skipped to next song",
        SkipOutcome::NothingPlaying => "❌ Nothing playing",
        SkipOutcome::QueueEmpty => "❌ Queue is empty",
    }
}

fn loop_message(mode: LoopMode) -> &'static str {
    match mode {
        LoopMode::Off => "➡️ Looping disabled",
        LoopMode::Song => "🔂 Looping current song",
        LoopMode::Queue => "🔁 Looping entire queue",
    }
}
