use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::{
    api::{Probe, ProbeStatus},
    core::utils::file_name_from_url,
    error::ModpackError,
    model::ModpackPart,
};

lazy_static! {
    static ref PART_PLACEHOLDER: Regex =
        Regex::new(r"\{(?:N|n|part)(?::(\d{1,2}))?\}").expect("part placeholder regex");
}

/// URL template for numbered modpack parts, e.g. `https://host/Modpack.part{N}.rar`.
///
/// `{N:2}` zero-pads the part number to two digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTemplate(String);

impl PartTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, ModpackError> {
        let template = template.into();
        if PART_PLACEHOLDER.is_match(&template) {
            Ok(Self(template))
        } else {
            Err(ModpackError::TemplateError(template))
        }
    }

    pub fn url(&self, index: u32) -> String {
        PART_PLACEHOLDER
            .replace_all(&self.0, |caps: &Captures| {
                let width = caps
                    .get(1)
                    .and_then(|w| w.as_str().parse::<usize>().ok())
                    .unwrap_or(0);
                format!("{index:0width$}")
            })
            .into_owned()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where the modpack bytes come from, decided once at the start of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModpackSource {
    /// One archive at a fixed URL
    Single(String),
    /// Numbered parts generated from a template
    MultiPart(PartTemplate),
    /// An archive that is already on disk
    Local(PathBuf),
}

impl ModpackSource {
    /// Metadata-only check that a single-file source exists.
    ///
    /// A definitive "not found" and an unreachable host are both `Ok(false)`; only an
    /// unexpected response is an error. `MultiPart` is always `false` since its parts have
    /// to be discovered, and `Local` checks the path on disk.
    pub fn exists(&self, probe: &impl Probe, timeout: Duration) -> Result<bool, ModpackError> {
        match self {
            ModpackSource::Single(url) => match probe.probe(url, timeout) {
                Ok(status) => Ok(status == ProbeStatus::Found),
                Err(e) if e.is_unreachable() => {
                    warn!("Unable to reach {url}: {e}");
                    Ok(false)
                }
                Err(e) => Err(e),
            },
            ModpackSource::MultiPart(_) => Ok(false),
            ModpackSource::Local(path) => Ok(path.try_exists()?),
        }
    }

    /// Turn the source into the concrete list of files to fetch, placing downloads in `temp_dir`.
    ///
    /// `Local` sources map to a single part pointing at the existing file. `on_found` is
    /// called for each discovered part of a `MultiPart` source as soon as it is confirmed.
    pub fn parts(
        &self,
        probe: &impl Probe,
        max_parts: u32,
        timeout: Duration,
        temp_dir: &Path,
        on_found: &mut dyn FnMut(u32),
    ) -> Vec<ModpackPart> {
        match self {
            ModpackSource::Single(url) => vec![ModpackPart {
                index: 1,
                source_url: url.clone(),
                local_path: temp_dir.join(file_name_from_url(url).unwrap_or("Modpack.rar")),
            }],
            ModpackSource::MultiPart(template) => {
                discover_parts(probe, template, max_parts, timeout, on_found)
                    .into_iter()
                    .map(|index| {
                        let source_url = template.url(index);
                        let file_name = file_name_from_url(&source_url)
                            .map(String::from)
                            .unwrap_or_else(|| format!("Modpack.part{index}.rar"));
                        ModpackPart {
                            index,
                            local_path: temp_dir.join(file_name),
                            source_url,
                        }
                    })
                    .collect()
            }
            ModpackSource::Local(path) => vec![ModpackPart {
                index: 1,
                source_url: path.display().to_string(),
                local_path: path.clone(),
            }],
        }
    }

    pub fn is_remote(&self) -> bool {
        !matches!(self, ModpackSource::Local(_))
    }
}

/// Probe parts `1..=max_parts` in order and return the contiguous prefix that exists.
///
/// Probing stops at the first part that is missing or can't be checked, so a gap always
/// ends the sequence. `on_found` sees every part before the next one is probed.
pub fn discover_parts(
    probe: &impl Probe,
    template: &PartTemplate,
    max_parts: u32,
    timeout: Duration,
    on_found: &mut dyn FnMut(u32),
) -> Vec<u32> {
    let mut found = vec![];
    for index in 1..=max_parts {
        let url = template.url(index);
        match probe.probe(&url, timeout) {
            Ok(ProbeStatus::Found) => {
                debug!("Found modpack part {index}");
                on_found(index);
                found.push(index);
            }
            Ok(ProbeStatus::Missing) => {
                debug!("Part {index} not found, stopping discovery");
                break;
            }
            Err(e) => {
                warn!("Probing part {index} failed, stopping discovery: {e}");
                break;
            }
        }
    }

    found
}
