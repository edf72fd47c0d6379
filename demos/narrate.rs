//! Narrate lines typed on stdin through the local espeak-ng engine.
//!
//! Run with: `RUST_LOG=debug cargo run --example narrate`

use std::io::BufRead;
use std::path::Path;

use voxline::{ChatEvent, ChatSource, Narrator, NarratorConfig, ProviderKind, SharedSettings};

#[tokio::main]
async fn main() {
    env_logger::init();

    let settings = SharedSettings::default();
    settings.update(|s| s.provider = ProviderKind::Espeak);
    let narrator = Narrator::start(NarratorConfig::new(settings), Path::new("lexicons"));
    let handle = narrator.handle();

    println!("Type a line to narrate it; Ctrl-D to quit.");
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        handle.send(ChatEvent {
            source: ChatSource::Synthetic,
            speaker: "Demo".to_string(),
            text: line,
            entity: None,
        });
    }

    narrator.shutdown().await;
}
