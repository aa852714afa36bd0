use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use sp_core::{ChoiceId, ScriptPlayError, Value};
use sp_runtime::ScriptPlayer;

pub fn run_line_mode(
    player: &mut ScriptPlayer,
    state_file: Option<&Path>,
    rich: bool,
) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut writer = io::stdout();
    run_line_mode_with_io(player, state_file, rich, &mut reader, &mut writer)
}

pub fn run_line_mode_with_io(
    player: &mut ScriptPlayer,
    state_file: Option<&Path>,
    rich: bool,
    reader: &mut dyn BufRead,
    writer: &mut dyn Write,
) -> anyhow::Result<()> {
    writeln!(writer, "Script player")?;
    writeln!(
        writer,
        "commands: <choice id> :next :back :set <name> <value> :save :state :quit :help"
    )?;

    if !player.is_started() {
        player.start()?;
    }

    loop {
        render_current(player, rich, writer)?;

        write!(writer, "> ")?;
        writer.flush()?;
        let mut raw = String::new();
        if reader.read_line(&mut raw)? == 0 {
            return Ok(());
        }
        let line = raw.trim();

        match line {
            "" => {}
            ":quit" => return Ok(()),
            ":help" => {
                writeln!(
                    writer,
                    "pick a choice by id, :next to advance, :back to return, \
                     :set <name> <value> to fill a property, :save / :state for persistence"
                )?;
            }
            ":next" => {
                if let Err(error) = player.advance() {
                    report(&error, writer)?;
                }
            }
            ":back" => {
                if let Err(error) = player.back() {
                    report(&error, writer)?;
                }
            }
            ":save" => match state_file {
                Some(path) => {
                    fs::write(path, player.state_to_json()?)?;
                    writeln!(writer, "saved to {}", path.display())?;
                }
                None => writeln!(writer, "no --state-file given")?,
            },
            ":state" => {
                writeln!(writer, "{}", player.state_to_json()?)?;
            }
            _ => {
                if let Some(rest) = line.strip_prefix(":set ") {
                    if let Err(error) = apply_set(player, rest) {
                        report(&error, writer)?;
                    }
                } else if let Ok(id) = line.parse::<u32>() {
                    match player.current_step() {
                        Some(step) => {
                            if let Err(error) = player.select_choice(step, ChoiceId::new(id)) {
                                report(&error, writer)?;
                            }
                        }
                        None => writeln!(writer, "player is not started")?,
                    }
                } else {
                    writeln!(writer, "unknown command: {}", line)?;
                }
            }
        }
    }
}

fn render_current(
    player: &ScriptPlayer,
    rich: bool,
    writer: &mut dyn Write,
) -> anyhow::Result<()> {
    let Some(current) = player.current_step() else {
        return Ok(());
    };

    writeln!(writer)?;
    writeln!(writer, "{}", player.step_text(current, rich)?)?;

    let choice_ids: Vec<ChoiceId> = player
        .definition()
        .step(current)
        .map(|step| step.choices().iter().map(|choice| choice.id()).collect())
        .unwrap_or_default();
    let choices: Vec<(ChoiceId, String)> = choice_ids
        .into_iter()
        .map(|id| {
            let text = player
                .choice_text(current, id, rich)
                .unwrap_or_else(|error| error.to_string());
            (id, text)
        })
        .collect();
    for (id, text) in &choices {
        let marker = if player.selected_choice(current) == Some(*id) {
            "*"
        } else {
            " "
        };
        writeln!(writer, " {}[{}] {}", marker, id, text)?;
    }
    Ok(())
}

fn apply_set(player: &mut ScriptPlayer, rest: &str) -> Result<(), ScriptPlayError> {
    let mut parts = rest.splitn(2, ' ');
    let name = parts.next().unwrap_or_default().trim();
    let raw_value = parts.next().unwrap_or_default().trim();
    if name.is_empty() || raw_value.is_empty() {
        return Err(ScriptPlayError::new(
            "CLI_SET_USAGE",
            "usage: :set <name> <value>",
        ));
    }

    let value = match raw_value.parse::<i64>() {
        Ok(number) => Value::Int(number),
        Err(_) => Value::from(raw_value),
    };
    player.set_value_by_tag(name, value)
}

fn report(error: &ScriptPlayError, writer: &mut dyn Write) -> anyhow::Result<()> {
    if error.code == "PLAYER_SCRIPT_FINISHED" {
        writeln!(writer, "Script finished.")?;
    } else {
        writeln!(writer, "{}", error.message)?;
    }
    Ok(())
}
