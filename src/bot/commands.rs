use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        queue_command(),
        skip_command(),
        next_command(),
        previous_command(),
        remove_command(),
        clear_command(),
        loop_command(),
        shuffle_command(),
        stop_command(),
        pause_command(),
        resume_command(),
        leave_command(),
    ]
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Add a song or playlist to the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL or search terms")
                .required(true),
        )
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause the current song")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Resume the paused song")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playback and clear the queue")
}

// Navegación

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current song")
}

fn next_command() -> CreateCommand {
    CreateCommand::new("next").description("Play the next song in the queue")
}

fn previous_command() -> CreateCommand {
    CreateCommand::new("previous").description("Go back to the previous song")
}

// Comandos de cola

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Show the queue")
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Remove a song from the queue")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "position",
                "Position shown by /queue",
            )
            .min_int_value(1)
            .required(true),
        )
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Clear the queue")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop")
        .description("Set the loop mode (no mode turns looping off)")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "mode", "Loop mode")
                .add_string_choice("Song", "song")
                .add_string_choice("Queue", "queue"),
        )
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Shuffle the upcoming songs")
}

// Conexión

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Stop playback and leave the voice channel")
}
