use std::io::Read;

use keystroke::stream::{EventType, KeystrokeStream, ESC};
use keystroke::tty::Tty;

/// Reads `KEYSTROKE_CSI` as a `u8`, following the config module's
/// `parse().map_err(...)` convention. Unset or unparsable means "use ESC".
fn csi_byte_from_env() -> Result<u8, String> {
    match std::env::var("KEYSTROKE_CSI") {
        Err(_) => Ok(ESC),
        Ok(s) => s
            .trim()
            .parse::<u8>()
            .map_err(|e| format!("KEYSTROKE_CSI: {}", e)),
    }
}

fn main() -> std::io::Result<()> {
    keystroke::debug_log::clear_debug_log();

    let csi_byte = match csi_byte_from_env() {
        Ok(b) => b,
        Err(e) => {
            eprintln!("keytap: {e}, falling back to ESC");
            ESC
        }
    };

    let mut tty = Tty::new()?;
    tty.enable_raw()?;

    let mut parser = KeystrokeStream::new(csi_byte);
    let mut input = std::io::stdin();
    let mut chunk = [0u8; 256];

    println!("keytap: press keys, Ctrl-D to exit\r");
    loop {
        let n = input.read(&mut chunk)?;
        if n == 0 {
            parser.input(None, None);
        } else {
            parser.input(Some(&chunk[..n]), None);
        }

        loop {
            let ev = parser.fetch();
            if ev.is_null() {
                break;
            }
            print_event(&ev);
        }

        if parser.eof_reached() {
            break;
        }
    }

    Ok(())
}

fn print_event(ev: &keystroke::stream::KeystrokeEvent) {
    match ev.kind {
        EventType::Char => print!("char {:#04x}\r\n", ev.value),
        EventType::Esc => print!("esc  {:#04x} params={:?}\r\n", ev.value, &ev.buf[..ev.len]),
        EventType::Csi => print!("csi  {:#04x} params={:?}\r\n", ev.value, &ev.buf[..ev.len]),
        EventType::Iac => print!("iac  {:#04x} data={:?}\r\n", ev.value, &ev.buf[..ev.len]),
        EventType::Null => {}
    }
    if !ev.flags.is_empty() {
        print!("  (flags: {:?})\r\n", ev.flags);
    }
}
