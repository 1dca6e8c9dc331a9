use anyhow::{Result, anyhow, bail};
use cadenza_shared::{Action, EventOptions, PlayOptions, ScheduleOptions};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Play { name: String, options: PlayOptions },
    Stop { name: String, options: PlayOptions },
    Toggle { name: String, options: PlayOptions },
    Schedule { name: String, beats: u32, action: Action, options: ScheduleOptions },
    Wait { beats: u32, options: EventOptions },
    Volume(f32),
    Suspend,
    Resume,
    Status,
    Start,
    FullStop,
    Quit,
}

pub const HELP: &str = "\
commands:
  play|stop|toggle <name> [fade=S] [now] [once] [keep]
  schedule <name> <beats> [play|stop|toggle] [absolute] [offset=N] [fade=S] [once] [keep]
  wait <beats> [absolute] [offset=N]
  volume <v>
  start | fullstop | suspend | resume | status | quit";

/// Parse one console line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match verb {
        "play" | "stop" | "toggle" => {
            let (name, flags) = split_name(verb, &rest)?;
            let options = play_options(flags)?;
            match verb {
                "play" => ConsoleCommand::Play { name, options },
                "stop" => ConsoleCommand::Stop { name, options },
                _ => ConsoleCommand::Toggle { name, options },
            }
        }
        "schedule" => {
            let (name, rest) = split_name(verb, &rest)?;
            let (beats, flags) = rest
                .split_first()
                .ok_or_else(|| anyhow!("schedule: missing beat count"))?;
            let beats = parse_beats(beats)?;
            let (action, flags) = match flags.first().map(|w| w.parse::<Action>()) {
                Some(Ok(action)) => (action, &flags[1..]),
                _ => (Action::Toggle, flags),
            };
            ConsoleCommand::Schedule {
                name,
                beats,
                action,
                options: schedule_options(flags)?,
            }
        }
        "wait" => {
            let (beats, flags) = rest
                .split_first()
                .ok_or_else(|| anyhow!("wait: missing beat count"))?;
            let beats = parse_beats(beats)?;
            let schedule = schedule_options(flags)?;
            ConsoleCommand::Wait {
                beats,
                options: schedule.event(),
            }
        }
        "volume" => {
            let value = rest.first().ok_or_else(|| anyhow!("volume: missing value"))?;
            let value: f32 = value.parse().map_err(|_| anyhow!("volume: `{value}` is not a number"))?;
            ConsoleCommand::Volume(value)
        }
        "start" => ConsoleCommand::Start,
        "fullstop" => ConsoleCommand::FullStop,
        "suspend" => ConsoleCommand::Suspend,
        "resume" => ConsoleCommand::Resume,
        "status" => ConsoleCommand::Status,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command `{other}`"),
    };
    Ok(Some(command))
}

fn split_name<'a, 'b>(verb: &str, rest: &'b [&'a str]) -> Result<(String, &'b [&'a str])> {
    match rest.split_first() {
        Some((name, flags)) => Ok((name.to_string(), flags)),
        None => bail!("{verb}: missing player name"),
    }
}

fn parse_beats(word: &str) -> Result<u32> {
    match word.parse::<u32>() {
        Ok(0) | Err(_) => bail!("beats must be a positive number, got `{word}`"),
        Ok(beats) => Ok(beats),
    }
}

fn parse_fade(value: &str) -> Result<f64> {
    let fade: f64 = value.parse().map_err(|_| anyhow!("fade: `{value}` is not a number"))?;
    if !(fade.is_finite() && fade >= 0.0) {
        bail!("fade must not be negative");
    }
    Ok(fade)
}

fn play_options(flags: &[&str]) -> Result<PlayOptions> {
    let mut options = PlayOptions::default();
    for flag in flags {
        match flag.split_once('=') {
            Some(("fade", value)) => options.fade = parse_fade(value)?,
            None if *flag == "now" => options.now = true,
            None if *flag == "once" => options.once = true,
            None if *flag == "keep" => options.keep = true,
            _ => bail!("unknown option `{flag}`"),
        }
    }
    Ok(options)
}

fn schedule_options(flags: &[&str]) -> Result<ScheduleOptions> {
    let mut options = ScheduleOptions::default();
    for flag in flags {
        match flag.split_once('=') {
            Some(("fade", value)) => options.fade = parse_fade(value)?,
            Some(("offset", value)) => {
                options.offset = value
                    .parse()
                    .map_err(|_| anyhow!("offset: `{value}` is not a whole number"))?
            }
            None if *flag == "absolute" => options.absolute = true,
            None if *flag == "once" => options.once = true,
            None if *flag == "keep" => options.keep = true,
            _ => bail!("unknown option `{flag}`"),
        }
    }
    Ok(options)
}
