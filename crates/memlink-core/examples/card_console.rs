//! Card Console
//!
//! Reads or writes a memory range on a card over a serial port, or on the
//! built-in simulator.
//!
//! Usage:
//!   cargo run --example card_console -- [OPTIONS]
//!
//! Options:
//!   --port PORT        Serial port (default: simulator)
//!   --list             List serial ports and exit
//!   --config FILE      JSON protocol configuration
//!   --bank N           Bank index: 0 = SD card, 1 = EEPROM, 2 = CPU (default: 1)
//!   --addr ADDR        Start address, decimal or 0x-prefixed hex (default: 0)
//!   --read LEN         Read LEN bytes
//!   --write BYTES      Write comma-separated hex bytes, e.g. 0x01,0xFF
//!   --random LEN       Write LEN random bytes
//!
//! Set RUST_LOG=debug to see frames on the wire.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use memlink_core::demo::CardSimulator;
use memlink_core::protocol::{
    list_ports, random_payload, Bank, DisplaySink, Intention, ProtocolConfig, Response,
    SerialTransport, TransactionSession, Transport, UserDecision,
};
use tracing_subscriber::EnvFilter;

struct Console;

impl DisplaySink for Console {
    fn on_progress(&self, chunk: &[u8]) {
        println!("<- {:02X?}", chunk);
    }

    fn on_error(&self, message: &str) {
        eprintln!("ERROR: {}", message);
    }

    fn on_response(&self, response: &Response) {
        println!(
            "status {:#04x}, {} data bytes: {:02X?}",
            response.status(),
            response.data().len(),
            response.data()
        );
    }
}

impl UserDecision for Console {
    fn continue_after_timeout(&self, elapsed_ms: u64, attempt: u32) -> bool {
        print!(
            "No complete response after {} ms (timeout {}). Keep waiting? [y/N] ",
            elapsed_ms, attempt
        );
        let _ = io::stdout().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }

    fn on_completed(&self, message: &str) {
        println!("{}", message);
    }

    fn on_aborted(&self, message: &str) {
        eprintln!("{}", message);
    }
}

enum Action {
    Read(usize),
    Write(Vec<u8>),
}

fn parse_number(s: &str) -> Result<u32> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.with_context(|| format!("invalid number '{}'", s))
}

fn parse_bytes(s: &str) -> Result<Vec<u8>> {
    s.split(',')
        .map(|part| {
            let part = part.trim();
            let hex = part.strip_prefix("0x").unwrap_or(part);
            u8::from_str_radix(hex, 16).with_context(|| format!("invalid byte '{}'", part))
        })
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut port_name: Option<String> = None;
    let mut config = ProtocolConfig::default();
    let mut bank = Bank::Eeprom;
    let mut addr = 0u32;
    let mut action: Option<Action> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1).map(String::as_str);
        match (args[i].as_str(), value) {
            ("--list", _) => {
                for port in list_ports() {
                    println!("{} {}", port.name, port.description.unwrap_or_default());
                }
                return Ok(());
            }
            ("--port", Some(v)) => port_name = Some(v.to_string()),
            ("--config", Some(v)) => config = ProtocolConfig::load(Path::new(v))?,
            ("--bank", Some(v)) => bank = Bank::from_index(v.parse()?)?,
            ("--addr", Some(v)) => addr = parse_number(v)?,
            ("--read", Some(v)) => action = Some(Action::Read(v.parse()?)),
            ("--write", Some(v)) => action = Some(Action::Write(parse_bytes(v)?)),
            ("--random", Some(v)) => action = Some(Action::Write(random_payload(v.parse()?))),
            (other, _) => bail!("unknown or incomplete option '{}'", other),
        }
        i += 2;
    }

    let Some(action) = action else {
        bail!("nothing to do: pass --read LEN, --write BYTES or --random LEN");
    };

    let console = Arc::new(Console);
    let (session, _link) = match port_name {
        Some(name) => {
            let port = Arc::new(SerialTransport::open(&name, &config)?);
            let session =
                TransactionSession::new(config, port.clone(), console.clone(), console.clone());
            port.start_reader(session.chunk_sink())?;
            (session, port as Arc<dyn Transport>)
        }
        None => {
            println!("No --port given, talking to the simulator");
            let card = Arc::new(CardSimulator::new());
            let session =
                TransactionSession::new(config, card.clone(), console.clone(), console.clone());
            card.attach(session.chunk_sink());
            (session, card as Arc<dyn Transport>)
        }
    };

    match action {
        Action::Read(len) => session.read(addr, len, bank, Intention::LOG)?,
        Action::Write(data) => {
            println!("-> writing {:02X?}", data);
            session.write(addr, &data, bank, Intention::LOG)?
        }
    }
    session.wait();

    Ok(())
}
