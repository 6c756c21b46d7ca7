use std::fmt::Display;
use std::io::{self, Write};

/// Writes lines with a two-space indentation level.
pub struct Printer<'w> {
    out: &'w mut dyn Write,
    indent: usize,
}

impl<'w> Printer<'w> {
    pub fn new(out: &'w mut dyn Write) -> Printer<'w> {
        Printer { out, indent: 0 }
    }

    pub fn indent(&mut self) {
        self.indent += 2;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(2);
    }

    pub fn print<D: Display + ?Sized>(&mut self, line: &D) -> io::Result<()> {
        writeln!(self.out, "{:indent$}{}", "", line, indent = self.indent)
    }

    pub fn print_lines<I, D>(&mut self, lines: I) -> io::Result<()>
    where
        I: IntoIterator<Item = D>,
        D: Display,
    {
        for line in lines {
            self.print(&line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_indentation() {
        let mut out = Vec::new();
        {
            let mut p = Printer::new(&mut out);
            p.print("a {").unwrap();
            p.indent();
            p.print_lines(vec!["b", "c"]).unwrap();
            p.dedent();
            p.dedent();
            p.print(&format!("{}", "}")).unwrap();
        }
        assert_eq!(String::from_utf8(out).unwrap(), "a {\n  b\n  c\n}\n");
    }
}
