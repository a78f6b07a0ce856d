use modpack::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => ModpackConfig::load(path).unwrap(),
        None => ModpackConfig::default(),
    };

    let pb = indicatif::ProgressBar::new(100)
        .with_style(
            indicatif::ProgressStyle::default_bar()
                .progress_chars("->.")
                .template("{msg} {wide_bar} {pos}%")
                .unwrap(),
        )
        .with_message("Installing modpack");

    let (handle, events) = spawn_install(config);
    for event in events {
        match event {
            SessionEvent::Progress(p) => pb.set_position(p.into()),
            SessionEvent::Status(s) => pb.println(format!("[SHC] {s}")),
        }
    }

    match handle.join().unwrap() {
        Ok(outcome) => pb.finish_with_message(outcome.summary()),
        Err(e) => pb.abandon_with_message(format!("Update failed: {e}")),
    }
}
