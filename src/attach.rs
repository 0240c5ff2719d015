//! Local terminal attach client.
//!
//! Bridges the current terminal to a running server: keystrokes go out as
//! raw messages (auth-exempt, on-box), and the rendered agent screen is
//! polled from `/internal/screen` and redrawn on change. Ctrl-Q detaches.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use serde_json::{json, Value};
use tokio_stream::StreamExt;

const SCREEN_POLL_PERIOD: Duration = Duration::from_millis(100);

pub async fn run(url: &str) -> Result<()> {
    let base = if url.starts_with("http://") || url.starts_with("https://") {
        url.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", url.trim_end_matches('/'))
    };
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("failed to build attach http client")?;

    enable_raw_mode().context("failed to enter raw mode")?;
    let result = attach_loop(&http, &base).await;
    disable_raw_mode().ok();
    println!();
    result
}

async fn attach_loop(http: &reqwest::Client, base: &str) -> Result<()> {
    let mut events = EventStream::new();
    let mut poll = tokio::time::interval(SCREEN_POLL_PERIOD);
    let mut last_screen = String::new();

    eprint!("attached to {base} (ctrl-q to detach)\r\n");

    loop {
        tokio::select! {
            _ = poll.tick() => {
                match fetch_screen(http, base).await {
                    Ok(screen) => {
                        if screen != last_screen {
                            redraw(&screen)?;
                            last_screen = screen;
                        }
                    }
                    Err(error) => {
                        tracing::debug!(target = "agent_console::attach", %error, "screen poll failed");
                    }
                }
            }
            maybe_event = events.next() => {
                let Some(event) = maybe_event else { break };
                let event = event.context("terminal event stream failed")?;
                if let Event::Key(key) = event {
                    if is_detach(&key) {
                        break;
                    }
                    if let Some(bytes) = encode_key(&key) {
                        send_raw(http, base, &bytes).await?;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn fetch_screen(http: &reqwest::Client, base: &str) -> Result<String> {
    let body: Value = http
        .get(format!("{base}/internal/screen"))
        .send()
        .await?
        .json()
        .await?;
    Ok(body
        .get("screen")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

async fn send_raw(http: &reqwest::Client, base: &str, content: &str) -> Result<()> {
    http.post(format!("{base}/message"))
        .json(&json!({ "content": content, "type": "raw" }))
        .send()
        .await
        .context("failed to forward keystroke")?;
    Ok(())
}

fn redraw(screen: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    // Clear, home, then the frame with CRLF line endings for raw mode.
    write!(stdout, "\x1b[2J\x1b[H")?;
    for line in screen.lines() {
        write!(stdout, "{line}\r\n")?;
    }
    stdout.flush()?;
    Ok(())
}

fn is_detach(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('q')
}

/// Translate a key event into the byte sequence a terminal would send.
fn encode_key(key: &KeyEvent) -> Option<String> {
    let bytes = match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            let byte = (c.to_ascii_lowercase() as u8).wrapping_sub(b'a').wrapping_add(1);
            if byte <= 0x1f {
                String::from(byte as char)
            } else {
                return None;
            }
        }
        KeyCode::Char(c) => c.to_string(),
        KeyCode::Enter => "\r".to_string(),
        KeyCode::Backspace => "\x7f".to_string(),
        KeyCode::Tab => "\t".to_string(),
        KeyCode::Esc => "\x1b".to_string(),
        KeyCode::Up => "\x1b[A".to_string(),
        KeyCode::Down => "\x1b[B".to_string(),
        KeyCode::Right => "\x1b[C".to_string(),
        KeyCode::Left => "\x1b[D".to_string(),
        KeyCode::Home => "\x1b[H".to_string(),
        KeyCode::End => "\x1b[F".to_string(),
        KeyCode::Delete => "\x1b[3~".to_string(),
        KeyCode::PageUp => "\x1b[5~".to_string(),
        KeyCode::PageDown => "\x1b[6~".to_string(),
        _ => return None,
    };
    Some(bytes)
}
