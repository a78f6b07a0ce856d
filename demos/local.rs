use std::path::PathBuf;

use modpack::prelude::*;

fn main() {
    let Some(archive) = std::env::args().nth(1).map(PathBuf::from) else {
        println!("Usage: local <Modpack.rar> [mods dir]");
        return;
    };

    let mut config = ModpackConfig {
        local_archive: Some(archive),
        ..Default::default()
    };
    if let Some(mods) = std::env::args().nth(2) {
        config.mods_dir = mods.into();
    }

    let res = install_modpack(&config, &mut |event| {
        if let SessionEvent::Status(s) = event {
            println!("{s}");
        }
    });

    if let Err(e) = res {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
