//! Line-oriented terminal front end
//!
//! Parses one command per line and drives the session controller with it.
//! Everything printed here is presentation; the session holds all logic.

use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;

use crate::attempt::AttemptMode;
use crate::audio::{SpectrumFrame, BIN_COUNT};
use crate::identity::{Identity, KeyError, LocalKeypair};
use crate::session::SessionController;
use crate::state_machine::{LogLevel, SessionError};

pub const HELP: &str = "\
Commands:
  enroll | verify          switch attempt mode
  phrase                   issue a new security phrase
  record                   start recording
  stop                     stop recording
  submit                   sign and submit the recording
  wallet new               create a wallet through the verifier
  wallet local             generate a throwaway local keypair
  wallet restore <words>   restore a keypair from its seed phrase
  wallet import <base58>   import a base58 secret key
  disconnect               forget the current wallet
  status                   show session state
  log                      show the session log, newest first
  meter                    show the live input spectrum
  help                     show this help
  quit                     exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mode(AttemptMode),
    Phrase,
    Record,
    Stop,
    Submit,
    WalletNew,
    WalletLocal,
    WalletRestore(String),
    WalletImport(String),
    Disconnect,
    Status,
    Log,
    Meter,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}` (try `help`)")]
    Unknown(String),
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };

        match head.to_ascii_lowercase().as_str() {
            "" => Err(ParseCommandError::Empty),
            "enroll" => Ok(Command::Mode(AttemptMode::Enroll)),
            "verify" => Ok(Command::Mode(AttemptMode::Verify)),
            "phrase" => Ok(Command::Phrase),
            "record" | "rec" => Ok(Command::Record),
            "stop" => Ok(Command::Stop),
            "submit" => Ok(Command::Submit),
            "disconnect" => Ok(Command::Disconnect),
            "status" => Ok(Command::Status),
            "log" => Ok(Command::Log),
            "meter" => Ok(Command::Meter),
            "help" | "?" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            "wallet" => parse_wallet(rest),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_wallet(args: &str) -> Result<Command, ParseCommandError> {
    let (sub, rest) = match args.split_once(char::is_whitespace) {
        Some((sub, rest)) => (sub, rest.trim()),
        None => (args, ""),
    };

    match sub {
        "new" => Ok(Command::WalletNew),
        "local" => Ok(Command::WalletLocal),
        "restore" if rest.is_empty() => Err(ParseCommandError::MissingArgument("wallet restore")),
        "restore" => Ok(Command::WalletRestore(rest.to_string())),
        "import" if rest.is_empty() => Err(ParseCommandError::MissingArgument("wallet import")),
        "import" => Ok(Command::WalletImport(rest.to_string())),
        "" => Err(ParseCommandError::MissingArgument("wallet")),
        other => Err(ParseCommandError::Unknown(format!("wallet {}", other))),
    }
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("invalid key: {0}")]
    Key(#[from] KeyError),
}

/// Whether the driver should keep reading commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Apply one command to the session, printing any direct output.
pub async fn execute(
    controller: &mut SessionController,
    command: Command,
) -> Result<Flow, ConsoleError> {
    match command {
        Command::Mode(mode) => controller.switch_mode(mode).await?,
        Command::Phrase => controller.regenerate_challenge().await?,
        Command::Record => controller.start_recording().await?,
        Command::Stop => controller.stop_recording().await?,
        Command::Submit => controller.submit().await?,
        Command::WalletNew => {
            let phrase = controller.create_local_wallet().await?;
            println!("Save this seed phrase to restore the wallet later:");
            println!("  {}", phrase.expose());
        }
        Command::WalletLocal => {
            controller
                .connect_identity(Identity::local(LocalKeypair::generate()))
                .await?
        }
        Command::WalletRestore(words) => {
            let keypair = LocalKeypair::from_mnemonic(&words)?;
            controller.connect_identity(Identity::local(keypair)).await?
        }
        Command::WalletImport(secret) => {
            let keypair = LocalKeypair::from_secret_base58(&secret)?;
            controller.connect_identity(Identity::local(keypair)).await?
        }
        Command::Disconnect => controller.disconnect_identity().await?,
        Command::Status => println!("{}", render_status(controller)),
        Command::Log => {
            for entry in controller.log().recent() {
                println!("{}", entry);
            }
        }
        Command::Meter => match controller.spectrum_snapshot() {
            Some(frame) => println!("|{}|", render_meter(&frame)),
            None => println!("Not recording."),
        },
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

/// Multi-line summary for `status`.
pub fn render_status(controller: &SessionController) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "State:   {}", controller.state());
    let _ = writeln!(out, "Mode:    {}", controller.mode());

    match controller.identity() {
        Some(identity) => {
            let _ = writeln!(
                out,
                "Wallet:  {} ({})",
                identity.address,
                identity.origin.label()
            );
        }
        None => {
            let _ = writeln!(out, "Wallet:  not connected");
        }
    }

    match controller.challenge() {
        Some(challenge) => {
            let _ = writeln!(out, "Phrase:  {}", challenge.phrase());
        }
        None => {
            let _ = writeln!(out, "Phrase:  (none)");
        }
    }

    match controller.pending_sample() {
        Some(sample) => {
            let _ = writeln!(out, "Audio:   {} bytes ready to submit", sample.len());
        }
        None => {
            let _ = writeln!(out, "Audio:   none");
        }
    }

    if let Some(elapsed) = controller.recording_elapsed() {
        let _ = writeln!(out, "Elapsed: {}s", elapsed.as_secs());
    }

    if let Some(result) = controller.last_result() {
        let verdict = if result.verified { "passed" } else { "failed" };
        let _ = write!(out, "Last:    {} {}", result.mode, verdict);
        if let Some(score) = result.score {
            let _ = write!(out, ", score {:.4}", score);
        }
        if let Some(threshold) = result.threshold {
            let _ = write!(out, " (threshold {:.2})", threshold);
        }
        if let Some(detail) = result.detail_line() {
            let _ = write!(out, ", {}", detail);
        }
        let _ = writeln!(out);
    }

    out.trim_end().to_string()
}

const BARS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// One bar per frequency bin, lowest first.
pub fn render_meter(frame: &SpectrumFrame) -> String {
    let mut out = String::with_capacity(BIN_COUNT * 3);
    for &value in frame.iter() {
        let level = (value as usize * (BARS.len() - 1) + 127) / 255;
        out.push(BARS[level.min(BARS.len() - 1)]);
    }
    out
}

/// Prefix for printing a log entry in the terminal.
pub fn level_marker(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => " ",
        LogLevel::Error => "!",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!("enroll".parse::<Command>(), Ok(Command::Mode(AttemptMode::Enroll)));
        assert_eq!("  VERIFY ".parse::<Command>(), Ok(Command::Mode(AttemptMode::Verify)));
        assert_eq!("record".parse::<Command>(), Ok(Command::Record));
        assert_eq!("stop".parse::<Command>(), Ok(Command::Stop));
        assert_eq!("submit".parse::<Command>(), Ok(Command::Submit));
        assert_eq!("quit".parse::<Command>(), Ok(Command::Quit));
    }

    #[test]
    fn parses_wallet_commands() {
        assert_eq!("wallet new".parse::<Command>(), Ok(Command::WalletNew));
        assert_eq!("wallet local".parse::<Command>(), Ok(Command::WalletLocal));
        assert_eq!(
            "wallet restore legal winner  thank".parse::<Command>(),
            Ok(Command::WalletRestore("legal winner  thank".to_string()))
        );
        assert_eq!(
            "wallet import 3xyz".parse::<Command>(),
            Ok(Command::WalletImport("3xyz".to_string()))
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<Command>(), Err(ParseCommandError::Empty));
        assert_eq!(
            "dance".parse::<Command>(),
            Err(ParseCommandError::Unknown("dance".to_string()))
        );
        assert_eq!(
            "wallet restore".parse::<Command>(),
            Err(ParseCommandError::MissingArgument("wallet restore"))
        );
        assert_eq!(
            "wallet".parse::<Command>(),
            Err(ParseCommandError::MissingArgument("wallet"))
        );
    }

    #[test]
    fn meter_scales_bins() {
        let mut frame = [0u8; BIN_COUNT];
        frame[0] = 255;
        frame[1] = 128;
        let meter = render_meter(&frame);
        assert_eq!(meter.chars().count(), BIN_COUNT);
        assert_eq!(meter.chars().next(), Some('█'));
        assert_eq!(meter.chars().nth(1), Some('▄'));
        assert_eq!(meter.chars().nth(2), Some(' '));
    }
}
