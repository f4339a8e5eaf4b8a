#[allow(dead_code)]
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::process;

use session::{HostReadiness, Session, SessionConfig};

const USAGE: &str = "Usage: sampler-emulator [--window HH:MM=topic]... [--zero <count>] \
                     [--span <count>] [--transcript <path>]";

fn main() -> io::Result<()> {
    let config = SessionConfig::from_args(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let readiness = HostReadiness::new();
    let mut session = Session::new(&readiness, config)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Soil Sampler Emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}
