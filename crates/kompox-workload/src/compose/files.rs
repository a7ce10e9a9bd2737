//! Config and secret source resolution
//!
//! A top-level config/secret becomes exactly one data key: the basename of
//! its file, or the definition name for inline content. File sources obey the
//! same confinement rules as env files and are capped at 1 MiB.

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::compose::project::FileObject;

/// Largest accepted config/secret payload
pub const MAX_FILE_SIZE: u64 = 1 << 20;

/// Which kind of object a definition becomes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// ConfigMap: UTF-8 text only
    Config,
    /// Secret: any bytes
    Secret,
}

impl FileKind {
    /// `config` or `secret`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Secret => "secret",
        }
    }
}

/// Resolved content of one definition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSource {
    /// Data key and projected file name
    pub key: String,
    /// Raw content
    pub content: Vec<u8>,
}

/// Data key a definition projects, without reading anything
pub fn source_key(name: &str, def: &FileObject) -> String {
    match &def.file {
        Some(file) => basename(file).to_string(),
        None => name.to_string(),
    }
}

/// Resolve a definition to its key and content.
///
/// Returns `None` for external or name-only definitions, which refer to
/// objects expected to exist in the cluster already.
pub fn resolve_file_object(
    base_dir: &Path,
    name: &str,
    def: &FileObject,
    kind: FileKind,
) -> Result<Option<FileSource>, String> {
    if def.is_passthrough() {
        return Ok(None);
    }

    if let Some(content) = &def.content {
        let content = content.as_bytes().to_vec();
        if content.len() as u64 > MAX_FILE_SIZE {
            return Err(format!(
                "inline content size {} exceeds limit {} (1 MiB)",
                content.len(),
                MAX_FILE_SIZE
            ));
        }
        if kind == FileKind::Config && !is_plain_text(&content) {
            return Err("ConfigMap inline content requires UTF-8 without BOM and no NUL bytes".to_string());
        }
        return Ok(Some(FileSource {
            key: name.to_string(),
            content,
        }));
    }

    let file = def.file.as_deref().ok_or_else(|| {
        format!(
            "config/secret {:?} must specify file, content, or name/external",
            name
        )
    })?;
    let content = read_file_content(base_dir, file, kind)?;
    Ok(Some(FileSource {
        key: basename(file).to_string(),
        content,
    }))
}

/// Read a confined source file
pub fn read_file_content(base_dir: &Path, rel_path: &str, kind: FileKind) -> Result<Vec<u8>, String> {
    if rel_path.starts_with('/') {
        return Err(format!("absolute path not allowed: {}", rel_path));
    }
    if rel_path.contains("..") {
        return Err(format!("path traversal not allowed: {}", rel_path));
    }
    if let Some(link) = first_symlink(base_dir, rel_path).map_err(|e| format!("stat failed: {}", e))? {
        return Err(format!("symlink not allowed: {}", link.display()));
    }
    let full = base_dir.join(rel_path);
    let meta = std::fs::symlink_metadata(&full).map_err(|e| format!("stat failed: {}", e))?;
    if meta.is_dir() {
        return Err(format!("directory not allowed: {}", rel_path));
    }
    if meta.len() > MAX_FILE_SIZE {
        return Err(format!(
            "file size {} exceeds limit {} (1 MiB): {}",
            meta.len(),
            MAX_FILE_SIZE,
            rel_path
        ));
    }
    let content = std::fs::read(&full).map_err(|e| format!("read file: {}", e))?;
    if content.len() as u64 > MAX_FILE_SIZE {
        return Err(format!(
            "file size {} exceeds limit {} (1 MiB): {}",
            content.len(),
            MAX_FILE_SIZE,
            rel_path
        ));
    }
    if kind == FileKind::Config && !is_plain_text(&content) {
        return Err(format!(
            "ConfigMap requires UTF-8 without BOM and no NUL bytes: {}",
            rel_path
        ));
    }
    Ok(content)
}

/// First component of `rel_path` below `base_dir` that is a symlink.
///
/// Every prefix is checked, so a linked parent directory cannot lead out of
/// `base_dir`. A missing component surfaces as the `stat` error.
pub fn first_symlink(base_dir: &Path, rel_path: &str) -> io::Result<Option<PathBuf>> {
    let mut prefix = PathBuf::new();
    for component in Path::new(rel_path).components() {
        let Component::Normal(part) = component else {
            continue;
        };
        prefix.push(part);
        if std::fs::symlink_metadata(base_dir.join(&prefix))?
            .file_type()
            .is_symlink()
        {
            return Ok(Some(prefix));
        }
    }
    Ok(None)
}

/// Valid UTF-8, no byte-order mark, no NUL
pub fn is_plain_text(content: &[u8]) -> bool {
    std::str::from_utf8(content).is_ok()
        && !content.starts_with(&[0xEF, 0xBB, 0xBF])
        && !content.contains(&0)
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> FileObject {
        FileObject {
            file: Some(path.to_string()),
            ..Default::default()
        }
    }

    // =========================================================================
    // Story: Definitions resolve to one key each
    // =========================================================================

    #[test]
    fn story_file_key_is_basename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("conf")).unwrap();
        std::fs::write(dir.path().join("conf/nginx.conf"), "server {}").unwrap();

        let source = resolve_file_object(dir.path(), "nginx", &file("./conf/nginx.conf"), FileKind::Config)
            .unwrap()
            .unwrap();
        assert_eq!(source.key, "nginx.conf");
        assert_eq!(source.content, b"server {}");
        assert_eq!(source_key("nginx", &file("./conf/nginx.conf")), "nginx.conf");
    }

    #[test]
    fn story_inline_content_uses_definition_name() {
        let def = FileObject {
            content: Some("hello".into()),
            ..Default::default()
        };
        let source = resolve_file_object(Path::new("."), "motd", &def, FileKind::Config)
            .unwrap()
            .unwrap();
        assert_eq!(source.key, "motd");
        assert_eq!(source_key("motd", &def), "motd");
    }

    #[test]
    fn story_passthrough_definitions_are_skipped() {
        let external = FileObject {
            external: true,
            ..Default::default()
        };
        assert!(resolve_file_object(Path::new("."), "x", &external, FileKind::Secret)
            .unwrap()
            .is_none());
    }

    #[test]
    fn story_definition_without_source() {
        let err = resolve_file_object(Path::new("."), "x", &FileObject::default(), FileKind::Secret)
            .unwrap_err();
        assert_eq!(err, "config/secret \"x\" must specify file, content, or name/external");
    }

    // =========================================================================
    // Story: ConfigMaps hold text, Secrets hold bytes
    // =========================================================================

    #[test]
    fn story_binary_is_rejected_for_configs_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("key.bin"), [0u8, 1, 2, 255]).unwrap();

        let err = resolve_file_object(dir.path(), "key", &file("key.bin"), FileKind::Config).unwrap_err();
        assert!(err.contains("UTF-8 without BOM"));

        let source = resolve_file_object(dir.path(), "key", &file("key.bin"), FileKind::Secret)
            .unwrap()
            .unwrap();
        assert_eq!(source.content, vec![0u8, 1, 2, 255]);
    }

    #[test]
    fn story_bom_is_not_plain_text() {
        assert!(is_plain_text(b"plain"));
        assert!(!is_plain_text(&[0xEF, 0xBB, 0xBF, b'a']));
        assert!(!is_plain_text(b"a\0b"));
    }

    // =========================================================================
    // Story: Source files are confined and bounded
    // =========================================================================

    #[test]
    fn story_confinement_rules() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_file_content(dir.path(), "/etc/hosts", FileKind::Secret)
            .unwrap_err()
            .starts_with("absolute path not allowed"));
        assert!(read_file_content(dir.path(), "../x", FileKind::Secret)
            .unwrap_err()
            .starts_with("path traversal not allowed"));
        std::fs::create_dir(dir.path().join("d")).unwrap();
        assert!(read_file_content(dir.path(), "d", FileKind::Secret)
            .unwrap_err()
            .starts_with("directory not allowed"));
    }

    #[cfg(unix)]
    #[test]
    fn story_symlinked_parent_directory_is_rejected() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("id_rsa"), "PRIVATE").unwrap();
        let base = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), base.path().join("link")).unwrap();

        let err = read_file_content(base.path(), "link/id_rsa", FileKind::Secret).unwrap_err();
        assert_eq!(err, "symlink not allowed: link");
        let err = resolve_file_object(base.path(), "key", &file("./link/id_rsa"), FileKind::Secret)
            .unwrap_err();
        assert!(err.starts_with("symlink not allowed"));
    }

    #[cfg(unix)]
    #[test]
    fn story_symlinked_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("real.conf"), "x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.conf"), dir.path().join("link.conf")).unwrap();
        assert_eq!(
            read_file_content(dir.path(), "link.conf", FileKind::Config).unwrap_err(),
            "symlink not allowed: link.conf"
        );
    }

    #[test]
    fn story_plain_nested_path_has_no_symlink() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("conf")).unwrap();
        std::fs::write(dir.path().join("conf/app.conf"), "x").unwrap();
        assert_eq!(first_symlink(dir.path(), "./conf/app.conf").unwrap(), None);
        assert!(first_symlink(dir.path(), "conf/missing.conf").is_err());
    }

    #[test]
    fn story_oversized_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big"), vec![b'a'; (MAX_FILE_SIZE + 1) as usize]).unwrap();
        let err = read_file_content(dir.path(), "big", FileKind::Secret).unwrap_err();
        assert!(err.contains("exceeds limit 1048576 (1 MiB)"));
    }
}
