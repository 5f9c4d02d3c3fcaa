//! Model parameter cards.
//!
//! A card lists `key = value` assignments on SPICE continuation lines,
//! several per line, with `*` starting a comment line:
//!
//! ```text
//! +version = 4.3             binunit = 1               paramchk= 1
//! +capmod  = 0               igcmod  = 0
//! *+sample = 0
//! ```
//!
//! Cards are edited by patching values where they stand, so the layout of
//! the remote file survives a round trip.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use regex::{Captures, Regex};

use crate::remote::RemoteHost;

const ASSIGNMENT: &str = r"([^\s=]+)[ \t]*=[ \t]*(\S+)";

/// Parameters of a card in the order they first appear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamCard {
    entries: Vec<(String, String)>,
}

impl ParamCard {
    /// Collect every assignment outside comment lines.  A key seen twice
    /// keeps its first position and its last value.
    pub fn parse(text: &str) -> Result<Self> {
        let pattern = Regex::new(ASSIGNMENT)?;
        let mut card = ParamCard::default();
        for line in text.lines() {
            if line.trim_start().starts_with('*') {
                continue;
            }
            for caps in pattern.captures_iter(line) {
                let key = caps[1].trim_start_matches('+');
                if !key.is_empty() {
                    card.set(key, &caps[2]);
                }
            }
        }
        Ok(card)
    }

    /// Value of `key`, compared without regard to case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some((_, v)) => *v = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How [`patch_card`] treats the template.
#[derive(Debug, Clone, Default)]
pub struct PatchOptions {
    /// Only patch from the first line containing `.0` up to the next line
    /// containing `.1`.
    pub section: Option<(String, String)>,
    /// Add `+key = value` lines for parameters the template lacks.
    pub insert_missing: bool,
    /// Put inserted lines after the first line containing this text
    /// instead of at the end.
    pub insert_after: Option<String>,
}

// ---------------------------------------------------------------------------
// Patching
// ---------------------------------------------------------------------------

/// Rewrite the values of `params` inside `template`.
///
/// Keys match case-insensitively and only as whole words, so `mod` does not
/// touch `mobmod`.  Spacing, continuation marks, comment lines and every
/// other assignment are kept as they are.
pub fn patch_card(template: &str, params: &ParamCard, options: &PatchOptions) -> Result<String> {
    if params.is_empty() {
        return Ok(template.to_string());
    }

    let mut keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
    // longest first, so a key that prefixes another cannot shadow it
    keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
    let alternatives: Vec<String> = keys.iter().map(|k| regex::escape(k)).collect();
    let pattern = Regex::new(&format!(
        r"(?i)(?P<lead>^|\s)(?P<plus>\+?)(?P<key>{})(?P<ws1>[ \t]*)=(?P<ws2>[ \t]*)\S+",
        alternatives.join("|")
    ))?;

    let mut found: HashSet<String> = HashSet::new();
    let mut in_section = options.section.is_none();
    let mut out = String::with_capacity(template.len());

    for line in template.split_inclusive('\n') {
        if let Some((start, end)) = &options.section {
            if !in_section && line.contains(start.as_str()) {
                in_section = true;
            } else if in_section && line.contains(end.as_str()) {
                in_section = false;
            }
        }
        if !in_section || line.trim_start().starts_with('*') {
            out.push_str(line);
            continue;
        }

        let patched = pattern.replace_all(line, |caps: &Captures| {
            let key = &caps["key"];
            let value = params.get(key).unwrap_or_default();
            found.insert(key.to_ascii_lowercase());
            format!(
                "{}{}{key}{}={}{value}",
                &caps["lead"], &caps["plus"], &caps["ws1"], &caps["ws2"]
            )
        });
        out.push_str(&patched);
    }

    if options.insert_missing {
        let mut block = String::new();
        for (key, value) in params.iter() {
            if !found.contains(&key.to_ascii_lowercase()) {
                let _ = writeln!(block, "+{key} = {value}");
            }
        }
        if !block.is_empty() {
            debug!("Inserting parameters missing from the card:\n{block}");
            out = insert_block(out, &block, options.insert_after.as_deref());
        }
    }

    Ok(out)
}

fn insert_block(mut text: String, block: &str, after: Option<&str>) -> String {
    if let Some(marker) = after {
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            offset += line.len();
            if line.contains(marker) {
                let mut head = text[..offset].to_string();
                if !head.ends_with('\n') {
                    head.push('\n');
                }
                head.push_str(block);
                head.push_str(&text[offset..]);
                return head;
            }
        }
    }
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(block);
    text
}

// ---------------------------------------------------------------------------
// Remote round trip
// ---------------------------------------------------------------------------

/// Download the card at `remote` into `staging` and parse it.  Returns the
/// raw text, which is the template for a later [`upload_card`].
pub fn fetch_card(host: &dyn RemoteHost, remote: &str, staging: &Path) -> Result<(String, ParamCard)> {
    let local = staging.join("params_template.txt");
    host.download(remote, &local)
        .with_context(|| format!("downloading parameter card {remote}"))?;
    let text = std::fs::read_to_string(&local)
        .with_context(|| format!("reading {}", local.display()))?;
    let card = ParamCard::parse(&text)?;
    info!("Loaded {} parameters from {remote}", card.len());
    Ok((text, card))
}

/// Patch `template` with `params` and upload the result to `remote`.
/// Returns the text that was uploaded.
pub fn upload_card(
    host: &dyn RemoteHost,
    template: &str,
    params: &ParamCard,
    options: &PatchOptions,
    remote: &str,
    staging: &Path,
) -> Result<String> {
    let text = patch_card(template, params, options)?;
    std::fs::create_dir_all(staging)
        .with_context(|| format!("creating {}", staging.display()))?;
    let local = staging.join("params_output.txt");
    std::fs::write(&local, &text).with_context(|| format!("writing {}", local.display()))?;
    host.upload(&local, remote)
        .with_context(|| format!("uploading parameter card to {remote}"))?;
    info!("Saved {} parameters to {remote}", params.len());
    Ok(text)
}
