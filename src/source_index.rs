//! Which files get traced, and what to show for each of their lines.

use crate::script::{
    ast::{walk_breadth_first, StmtKind},
    error::ParseError,
    parser::parse_module,
};
use std::{
    collections::{BTreeSet, HashMap},
    error::Error,
    fmt::{self, Display, Formatter},
    fs, io,
    path::{Path, PathBuf},
};

#[derive(Debug)]
pub enum SourceError {
    Io(PathBuf, io::Error),
    Parse(ParseError),
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Io(path, e) => write!(f, "Could not read {}: {}", path.display(), e),
            SourceError::Parse(e) => write!(f, "{}", e),
        }
    }
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SourceError::Io(_, e) => Some(e),
            SourceError::Parse(e) => Some(e),
        }
    }
}

impl From<ParseError> for SourceError {
    fn from(e: ParseError) -> Self {
        SourceError::Parse(e)
    }
}

fn read_source(path: &Path) -> Result<String, SourceError> {
    fs::read_to_string(path).map_err(|e| SourceError::Io(path.to_owned(), e))
}

/// `<dir>/a/b.py` for module `a.b`, if that file exists.
fn module_file(dir: &Path, dotted: &[String]) -> Option<PathBuf> {
    let mut candidate = dir.to_owned();
    for part in dotted {
        candidate.push(part);
    }
    let candidate = candidate.with_extension("py");
    if candidate.is_file() {
        Some(candidate)
    } else {
        None
    }
}

/// The entry file plus every module it imports (transitively) that lives
/// under the entry file's directory. `entry` should be absolute.
pub fn find_imports(entry: &Path) -> Result<BTreeSet<PathBuf>, SourceError> {
    let dir = entry.parent().unwrap_or_else(|| Path::new("/")).to_owned();
    let mut found = BTreeSet::new();
    let mut pending = vec![entry.to_owned()];

    while let Some(file) = pending.pop() {
        if !found.insert(file.clone()) {
            continue;
        }
        let source = read_source(&file)?;
        let module = parse_module(&source, &file)?;
        let mut imported = Vec::new();
        walk_breadth_first(&module.body, |stmt| match &stmt.kind {
            StmtKind::Import(names) => {
                for name in names {
                    imported.extend(module_file(&dir, &name.path));
                }
            }
            StmtKind::ImportFrom { module, names } => {
                imported.extend(module_file(&dir, module));
                // `from pkg import sub` may name a submodule.
                for (name, _) in names {
                    let mut path = module.clone();
                    path.push(name.clone());
                    imported.extend(module_file(&dir, &path));
                }
            }
            _ => (),
        });
        pending.extend(imported.into_iter().filter(|f| !found.contains(f)));
    }

    Ok(found)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SourceLine {
    /// Full text of the statement that begins on this line.
    Segment(String),
    /// No statement begins here.
    Line(String),
}

/// Per-line classification of one file.
#[derive(Debug, Default)]
pub struct SourceIndex {
    lines: HashMap<u32, SourceLine>,
    raw: Vec<String>,
}

impl SourceIndex {
    pub fn load(path: &Path) -> Result<SourceIndex, SourceError> {
        let source = read_source(path)?;
        SourceIndex::from_source(&source, path)
    }

    pub fn from_source(source: &str, path: &Path) -> Result<SourceIndex, SourceError> {
        let module = parse_module(source, path)?;
        let mut segments = HashMap::new();
        // Breadth first so that the innermost statement on a line wins.
        walk_breadth_first(&module.body, |stmt| {
            let text = source
                .get(stmt.span.start..stmt.span.end)
                .unwrap_or_default()
                .to_owned();
            segments.insert(stmt.line, text);
        });

        let raw: Vec<String> = source.lines().map(|l| l.to_owned()).collect();
        let mut lines = HashMap::new();
        for (i, line) in raw.iter().enumerate() {
            let lineno = i as u32 + 1;
            let entry = match segments.remove(&lineno) {
                Some(segment) => SourceLine::Segment(segment),
                None => SourceLine::Line(line.clone()),
            };
            lines.insert(lineno, entry);
        }
        Ok(SourceIndex { lines, raw })
    }

    pub fn get(&self, lineno: u32) -> Option<&SourceLine> {
        self.lines.get(&lineno)
    }

    /// Text of line `lineno` as it appears in the file.
    pub fn raw_line(&self, lineno: u32) -> Option<&str> {
        let i = (lineno as usize).checked_sub(1)?;
        self.raw.get(i).map(|l| l.as_str())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, text: &str) -> PathBuf {
        let p = dir.join(rel);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&p, text).unwrap();
        p
    }

    #[test]
    fn local_import_is_included() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(tmp.path(), "a.py", "import b\nb.f()\n");
        let b = write(tmp.path(), "b.py", "def f():\n    pass\n");
        let found = find_imports(&a).unwrap();
        assert_eq!(vec![a, b], found.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn library_import_is_excluded() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(tmp.path(), "a.py", "import math\nfrom os import path\n");
        let found = find_imports(&a).unwrap();
        assert_eq!(1, found.len());
        assert!(found.contains(&a));
    }

    #[test]
    fn imports_are_followed_transitively() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(tmp.path(), "a.py", "from pkg.b import g\n");
        let b = write(tmp.path(), "pkg/b.py", "import c\ndef g():\n    return c.h()\n");
        let c = write(tmp.path(), "c.py", "import a\ndef h():\n    return 1\n");
        let found = find_imports(&a).unwrap();
        assert_eq!(3, found.len());
        assert!(found.contains(&b));
        assert!(found.contains(&c));
    }

    #[test]
    fn from_package_import_submodule() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(tmp.path(), "a.py", "def f():\n    from pkg import inner\n");
        let inner = write(tmp.path(), "pkg/inner.py", "X = 1\n");
        assert!(find_imports(&a).unwrap().contains(&inner));
    }

    #[test]
    fn syntax_error_in_import_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(tmp.path(), "a.py", "import b\n");
        write(tmp.path(), "b.py", "def (:\n");
        match find_imports(&a) {
            Err(SourceError::Parse(e)) => assert!(e.file.ends_with("b.py")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classification() {
        let src = "x = 1\n\nif x:\n    y = [1,\n         2]\n# note\n";
        let idx = SourceIndex::from_source(src, Path::new("/t/m.py")).unwrap();
        assert_eq!(Some(&SourceLine::Segment("x = 1".into())), idx.get(1));
        assert_eq!(Some(&SourceLine::Line("".into())), idx.get(2));
        assert_eq!(
            Some(&SourceLine::Segment("if x:\n    y = [1,\n         2]".into())),
            idx.get(3)
        );
        assert_eq!(
            Some(&SourceLine::Segment("y = [1,\n         2]".into())),
            idx.get(4)
        );
        assert_eq!(Some(&SourceLine::Line("         2]".into())), idx.get(5));
        assert_eq!(Some(&SourceLine::Line("# note".into())), idx.get(6));
        assert_eq!(None, idx.get(7));
        assert_eq!(6, idx.len());
        assert_eq!(Some("    y = [1,"), idx.raw_line(4));
        assert_eq!(None, idx.raw_line(0));
    }

    #[test]
    fn innermost_statement_wins() {
        let src = "while False: x = 1\n";
        let idx = SourceIndex::from_source(src, Path::new("/t/m.py")).unwrap();
        assert_eq!(Some(&SourceLine::Segment("x = 1".into())), idx.get(1));
    }
}
