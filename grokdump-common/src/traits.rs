use std::borrow::Cow;

/// An executable or shared library loaded in a process.
pub trait Module {
    /// The base address of this code module as it was loaded by the process.
    fn base_address(&self) -> u64;
    /// The size of the code module.
    fn size(&self) -> u64;
    /// The path or file name that the code module was loaded from.
    fn code_file(&self) -> Cow<'_, str>;

    /// The last path component of [`Module::code_file`], with either kind of separator.
    fn short_name(&self) -> Cow<'_, str> {
        match self.code_file() {
            Cow::Borrowed(path) => Cow::Borrowed(basename(path)),
            Cow::Owned(path) => Cow::Owned(basename(&path).to_owned()),
        }
    }

    /// Whether `address` falls inside this module's image.
    fn contains(&self, address: u64) -> bool {
        address >= self.base_address()
            && address - self.base_address() < self.size()
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(path)
}

/// Implement Module for `(base, size, name)` tuples for convenience.
impl<'a> Module for (u64, u64, &'a str) {
    fn base_address(&self) -> u64 {
        self.0
    }
    fn size(&self) -> u64 {
        self.1
    }
    fn code_file(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.2)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_short_name() {
        let m = (0x1000, 0x100, "c:\\program files\\chrome\\chrome.dll");
        assert_eq!(m.short_name(), "chrome.dll");
        let m = (0x1000, 0x100, "/usr/lib/libc.so.6");
        assert_eq!(m.short_name(), "libc.so.6");
        let m = (0x1000, 0x100, "plain.exe");
        assert_eq!(m.short_name(), "plain.exe");
    }

    #[test]
    fn test_contains() {
        let m = (0x1000, 0x100, "a.dll");
        assert!(m.contains(0x1000));
        assert!(m.contains(0x10ff));
        assert!(!m.contains(0x1100));
        assert!(!m.contains(0xfff));
    }
}
