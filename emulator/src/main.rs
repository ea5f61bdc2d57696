mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use crossterm::style::Stylize;
use node_core::device::FIRMWARE_BANNER;

use session::{Line, LineKind, Session, SessionOptions};

const USAGE: &str =
    "Usage: node-emulator [--host <broker>] [--port <port>] [--hold-button1] [--sync-time] [--transcript <path>]";

fn main() -> ExitCode {
    let options = match parse_options(env::args().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let outcome = Session::new(&options)
        .and_then(|mut session| run(&mut session, io::stdin().lock(), io::stdout().lock()));
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("emulator stopped: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Feeds commands from `input` into the session until EOF or `exit`.
fn run(session: &mut Session, input: impl BufRead, mut out: impl Write) -> io::Result<()> {
    writeln!(
        out,
        "{FIRMWARE_BANNER} emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    print_lines(&mut out, &session.drain())?;

    let mut commands = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(command) = commands.next().transpose()? else {
            writeln!(out)?;
            return Ok(());
        };
        let command = command.trim();
        if command.is_empty() {
            continue;
        }
        if is_exit(command) {
            writeln!(out, "Session closed after {}.", session.device().uptime())?;
            return Ok(());
        }

        let responses = session.handle_command(command)?;
        print_lines(&mut out, &responses)?;
    }
}

fn print_lines(out: &mut impl Write, lines: &[Line]) -> io::Result<()> {
    for line in lines {
        let text = line.text.as_str();
        match line.kind {
            LineKind::Info => writeln!(out, "{text}")?,
            LineKind::Event => writeln!(out, "{}", text.cyan())?,
            LineKind::Error => writeln!(out, "{}", text.red())?,
            LineKind::Published => writeln!(out, "{}", text.green())?,
        }
    }
    Ok(())
}

fn is_exit(command: &str) -> bool {
    ["exit", "quit"]
        .iter()
        .any(|word| command.eq_ignore_ascii_case(word))
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or_else(|| format!("Expected value after {flag}"));
        match flag.as_str() {
            "--host" => options.host = Some(value()?),
            "--port" => options.port = Some(value()?),
            "--transcript" => options.transcript = Some(PathBuf::from(value()?)),
            "--hold-button1" => options.hold_button1 = true,
            "--sync-time" => options.sync_time = true,
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }
    Ok(options)
}
