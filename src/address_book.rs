//! ==============================================================================
//! address_book.rs - named lists of sensor node addresses
//! ==============================================================================
//!
//! purpose:
//!     keeps the control node's named address lists, tracks which one is
//!     selected, and produces the "clean" (valid + currently online) view
//!     that every heavyweight fan-out starts from.
//!
//! on-disk format (one file per list, `<name>.txt`):
//!
//! ```text
//!     10.0.0.5 = IP Address #1
//!     10.0.0.6:9999 = IP Address #2
//!      = IP Address #3
//!
//!     one line per slot. text before the first `=` is the address; a line
//!     without `=` or with nothing before it is an empty slot. slot positions
//!     survive a save/load round trip.
//! ```
//!
//! relationships:
//!     - uses:    probe.rs (clean_addresses)
//!     - used by: fleet.rs
//!
//! ==============================================================================

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::{Address, NodeKey, DEFAULT_PORT};
use crate::error::{FleetError, Result};
use crate::probe::Prober;

pub const DEFAULT_LIST_NAME: &str = "Default_IP_List";
const EMPTY_NAME: &str = "No_Name";
const LIST_EXTENSION: &str = "txt";

// ==============================================================================
// persistence seam
// ==============================================================================

/// backing store for address lists; all calls persist synchronously
pub trait ListStore: Send + Sync {
    /// list names, sorted
    fn names(&self) -> Result<Vec<String>>;
    fn load(&self, name: &str) -> Result<Vec<String>>;
    fn save(&self, name: &str, slots: &[String]) -> Result<()>;
    fn rename(&self, old: &str, new: &str) -> Result<()>;
    fn remove(&self, name: &str) -> Result<()>;
}

/// one `<name>.txt` file per list inside a directory
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, LIST_EXTENSION))
    }

    fn not_found(name: &str, error: std::io::Error) -> FleetError {
        if error.kind() == ErrorKind::NotFound {
            FleetError::NotFound(name.to_string())
        } else {
            FleetError::Io(error)
        }
    }
}

impl ListStore for DirectoryStore {
    fn names(&self) -> Result<Vec<String>> {
        fs::create_dir_all(&self.dir)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(LIST_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<Vec<String>> {
        let text = fs::read_to_string(self.path(name)).map_err(|e| Self::not_found(name, e))?;
        Ok(decode_slots(&text))
    }

    fn save(&self, name: &str, slots: &[String]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(name), encode_slots(slots))?;
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        fs::rename(self.path(old), self.path(new)).map_err(|e| Self::not_found(old, e))
    }

    fn remove(&self, name: &str) -> Result<()> {
        fs::remove_file(self.path(name)).map_err(|e| Self::not_found(name, e))
    }
}

pub fn encode_slots(slots: &[String]) -> String {
    slots
        .iter()
        .enumerate()
        .map(|(index, address)| format!("{} = IP Address #{}\n", address.trim(), index + 1))
        .collect()
}

pub fn decode_slots(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| match line.split_once('=') {
            Some((address, _)) => address.trim().to_string(),
            None => String::new(),
        })
        .collect()
}

/// keep `[A-Za-z0-9_.-]`, drop a `.txt` suffix, never empty
pub fn sanitize_list_name(name: &str) -> String {
    let kept: String = name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    let kept = kept.strip_suffix(".txt").unwrap_or(&kept);
    if kept.is_empty() {
        EMPTY_NAME.to_string()
    } else {
        kept.to_string()
    }
}

// ==============================================================================
// address book
// ==============================================================================

pub struct AddressBook {
    store: Box<dyn ListStore>,
    slots: usize,
    default_port: u16,
    selected: Option<String>,
    working: Vec<String>,
}

impl AddressBook {
    pub fn new(store: Box<dyn ListStore>, slots: usize) -> Self {
        Self {
            store,
            slots,
            default_port: DEFAULT_PORT,
            selected: None,
            working: Vec::new(),
        }
    }

    /// port assumed for slots without one when comparing addresses
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// all list names; creates the default list when none exist yet
    pub fn list_names(&mut self) -> Result<Vec<String>> {
        let names = self.store.names()?;
        if !names.is_empty() {
            return Ok(names);
        }

        tracing::info!("[ADDRESS BOOK] no address lists found, creating {}", DEFAULT_LIST_NAME);
        self.store.save(DEFAULT_LIST_NAME, &vec![String::new(); self.slots])?;
        Ok(vec![DEFAULT_LIST_NAME.to_string()])
    }

    pub fn select(&mut self, name: &str) -> Result<()> {
        if !self.list_names()?.iter().any(|n| n == name) {
            return Err(FleetError::NotFound(name.to_string()));
        }
        self.working = self.store.load(name)?;
        self.selected = Some(name.to_string());
        tracing::debug!("[ADDRESS BOOK] selected {} ({} slots)", name, self.working.len());
        Ok(())
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// slots of the selected list as stored, empty slots included
    pub fn raw_addresses(&self) -> &[String] {
        &self.working
    }

    /// replace the whole slot vector of the selected list and persist it
    pub fn set_addresses(&mut self, slots: Vec<String>) -> Result<()> {
        let name = self.selected.clone().ok_or(FleetError::NoListSelected)?;
        if slots.len() > self.slots {
            return Err(FleetError::TooManyAddresses {
                max: self.slots,
                got: slots.len(),
            });
        }

        let slots: Vec<String> = slots.into_iter().map(|s| s.trim().to_string()).collect();
        let mut seen = HashSet::new();
        for address in slots.iter().filter(|s| !s.is_empty()) {
            // unparseable text is kept as typed and only compared as text
            let key = match Address::parse(address) {
                Ok(parsed) => SlotKey::Node(parsed.node_key(self.default_port)),
                Err(_) => SlotKey::Text(address.clone()),
            };
            if !seen.insert(key) {
                return Err(FleetError::InvalidAddress(format!("duplicate address {}", address)));
            }
        }

        self.store.save(&name, &slots)?;
        self.working = slots;
        Ok(())
    }

    /// create an empty list; returns the name actually used
    pub fn create(&mut self, name: &str) -> Result<String> {
        let name = self.unique_name(name)?;
        self.store.save(&name, &vec![String::new(); self.slots])?;
        tracing::info!("[ADDRESS BOOK] created list {}", name);
        Ok(name)
    }

    /// returns the name actually used
    pub fn rename(&mut self, old: &str, new: &str) -> Result<String> {
        if !self.store.names()?.iter().any(|n| n == old) {
            return Err(FleetError::NotFound(old.to_string()));
        }
        let new = self.unique_name(new)?;
        self.store.rename(old, &new)?;
        if self.selected.as_deref() == Some(old) {
            self.selected = Some(new.clone());
        }
        tracing::info!("[ADDRESS BOOK] renamed list {} -> {}", old, new);
        Ok(new)
    }

    /// deleting the selected list leaves nothing selected
    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.store.remove(name)?;
        if self.selected.as_deref() == Some(name) {
            self.selected = None;
            self.working.clear();
        }
        tracing::info!("[ADDRESS BOOK] deleted list {}", name);
        Ok(())
    }

    fn unique_name(&self, requested: &str) -> Result<String> {
        let base = sanitize_list_name(requested);
        let existing = self.store.names()?;
        if !existing.contains(&base) {
            return Ok(base);
        }
        let mut n = 1;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !existing.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
enum SlotKey {
    Node(NodeKey),
    Text(String),
}

/// valid, non-empty slots that answered a status probe, in slot order.
/// a node written more than once is kept at its first slot only.
pub async fn clean_addresses(
    slots: &[String],
    prober: &Prober,
    timeout: Duration,
    default_port: u16,
) -> Vec<Address> {
    let mut candidates: Vec<Address> = Vec::new();
    let mut seen = HashSet::new();
    for slot in slots.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        match Address::parse(slot) {
            Ok(address) => {
                if seen.insert(address.node_key(default_port)) {
                    candidates.push(address);
                } else {
                    tracing::debug!("[ADDRESS BOOK] {} repeats an earlier slot, skipping", slot);
                }
            }
            Err(_) => tracing::warn!("[ADDRESS BOOK] skipping invalid address {:?}", slot),
        }
    }
    if candidates.is_empty() {
        return candidates;
    }
    prober.online(&candidates, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_empty_slot_positions() {
        let text = "10.0.0.5 = IP Address #1\n = IP Address #2\n\nsensor.lan = IP Address #4\n";
        assert_eq!(decode_slots(text), ["10.0.0.5", "", "", "sensor.lan"]);
    }

    #[test]
    fn encode_numbers_slots_from_one() {
        let slots = vec!["10.0.0.5".to_string(), String::new()];
        assert_eq!(encode_slots(&slots), "10.0.0.5 = IP Address #1\n = IP Address #2\n");
    }

    #[test]
    fn list_name_sanitising() {
        assert_eq!(sanitize_list_name("Kitchen Nodes!"), "KitchenNodes");
        assert_eq!(sanitize_list_name("garage.txt"), "garage");
        assert_eq!(sanitize_list_name("../../etc"), "....etc");
        assert_eq!(sanitize_list_name("  ?? "), "No_Name");
    }
}
