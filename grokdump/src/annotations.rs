//! Operator annotations kept in a `<dump>.comments` sidecar file.
//!
//! The file is an append-only log of two kinds of line:
//!
//! ```text
//! C 0x<address> <comment text>
//! P <mappage|datapage|pointerpage> 0x<address>
//! ```
//!
//! Later lines override earlier ones. Lines matching neither form are ignored.

use regex::Regex;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::padawan::{Landmarks, PageKind};

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^C (0x[0-9a-fA-F]+) (.*)$").unwrap())
}

fn page_address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^P (mappage|pointerpage|datapage) (0x[0-9a-fA-F]+)$").unwrap())
}

fn parse_hex(text: &str) -> Option<u64> {
    u64::from_str_radix(text.trim_start_matches("0x"), 16).ok()
}

/// The sidecar path for the dump at `dump_path`.
pub fn comments_path(dump_path: &Path) -> PathBuf {
    let mut name = dump_path.as_os_str().to_owned();
    name.push(".comments");
    PathBuf::from(name)
}

/// Address comments and landmark pages for one dump.
#[derive(Debug, Default)]
pub struct AnnotationStore {
    /// Where mutations are appended. `None` keeps everything in memory.
    path: Option<PathBuf>,
    comments: BTreeMap<u64, String>,
    pages: Landmarks,
}

impl AnnotationStore {
    /// A store that persists nothing.
    pub fn in_memory() -> AnnotationStore {
        AnnotationStore::default()
    }

    /// Open the sidecar file for the dump at `dump_path`.
    ///
    /// A missing sidecar is an empty store; one that can't be read is logged and treated
    /// the same way.
    pub fn for_dump(dump_path: &Path) -> AnnotationStore {
        let path = comments_path(dump_path);
        let mut store = AnnotationStore {
            path: Some(path.clone()),
            ..AnnotationStore::default()
        };
        match fs::read_to_string(&path) {
            Ok(text) => store.load_text(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("couldn't read {}: {}", path.display(), e),
        }
        store
    }

    /// Apply the lines of a sidecar file.
    pub fn load_text(&mut self, text: &str) {
        for line in text.lines() {
            if let Some(caps) = comment_re().captures(line) {
                if let Some(address) = parse_hex(&caps[1]) {
                    self.comments.insert(address, caps[2].to_owned());
                }
            } else if let Some(caps) = page_address_re().captures(line) {
                if let (Ok(kind), Some(address)) = (caps[1].parse::<PageKind>(), parse_hex(&caps[2])) {
                    self.pages.set(kind, address);
                }
            } else {
                debug!("ignoring sidecar line: {}", line);
            }
        }
    }

    pub fn comment(&self, address: u64) -> Option<&str> {
        self.comments.get(&address).map(String::as_str)
    }

    pub fn landmarks(&self) -> Landmarks {
        self.pages
    }

    fn append(&self, line: &str) -> io::Result<()> {
        if let Some(path) = &self.path {
            let mut f = OpenOptions::new().create(true).append(true).open(path)?;
            f.write_all(line.as_bytes())?;
            f.flush()?;
        }
        Ok(())
    }

    /// Attach `text` to `address` and append it to the sidecar.
    pub fn set_comment(&mut self, address: u64, text: &str) -> io::Result<()> {
        // A newline would split the record.
        let text = text.replace('\n', " ");
        self.append(&format!("C 0x{:x} {}\n", address, text))?;
        self.comments.insert(address, text);
        Ok(())
    }

    /// Record the page containing `address` as the `kind` landmark and append it to the
    /// sidecar.
    pub fn set_page(&mut self, kind: PageKind, address: u64) -> io::Result<()> {
        let mut pages = self.pages;
        pages.set(kind, address);
        self.append(&format!("P {} 0x{:x}\n", kind, pages.get(kind)))?;
        self.pages = pages;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_comments_path() {
        assert_eq!(
            comments_path(Path::new("/tmp/crash.dmp")),
            PathBuf::from("/tmp/crash.dmp.comments")
        );
    }

    #[test]
    fn test_load_text() {
        let mut store = AnnotationStore::in_memory();
        store.load_text(
            "C 0x1000 first\n\
P mappage 0x08100000\n\
garbage\n\
P codepage 0x1\n\
C 0x1000 second try\n\
P datapage 0x0812345\n",
        );
        assert_eq!(store.comment(0x1000), Some("second try"));
        assert_eq!(store.comment(0x2000), None);
        let l = store.landmarks();
        assert_eq!(l.map_page, 0x0810_0000);
        assert_eq!(l.data_page, 0x0080_0000);
        assert_eq!(l.pointer_page, 0);
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("minidump.dmp");
        {
            let mut store = AnnotationStore::for_dump(&dump);
            assert_eq!(store.comment(0xabc), None);
            store.set_comment(0xabc, "interesting\nstuff").unwrap();
            store.set_page(PageKind::Pointer, 0x0830_1234).unwrap();
        }
        let text = fs::read_to_string(dir.path().join("minidump.dmp.comments")).unwrap();
        assert_eq!(text, "C 0xabc interesting stuff\nP pointerpage 0x8300000\n");

        let store = AnnotationStore::for_dump(&dump);
        assert_eq!(store.comment(0xabc), Some("interesting stuff"));
        assert_eq!(store.landmarks().pointer_page, 0x0830_0000);
    }
}
