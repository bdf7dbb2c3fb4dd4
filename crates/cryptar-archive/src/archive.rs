//! Archive engine: open/create, append, enumerate, tombstone, move, compact,
//! stream, password rotation
//!
//! One `Archive` assumes exclusive ownership of the file; there is no locking
//! and no internal concurrency. All operations seek to a known offset and
//! drive the item and body codecs from there. Compaction and move are the
//! only operations that open the path a second time (one read cursor, one
//! write cursor against the same file).

use std::fs::{self, File, FileTimes, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use glob::Pattern;
use rand::RngCore;
use secrecy::SecretString;
use tracing::{debug, info, warn};

use cryptar_core::{ArchiveOptions, CryptarError, CryptarResult};
use cryptar_crypto::{
    unwrap_data_key, wrap_data_key, CipherBox, DataKey, Kek, NONCE_SIZE, SALT_SIZE,
};

use crate::body;
use crate::header::{ArchiveHeader, HEADER_LEN, VERSION};
use crate::item::{Item, ItemHeader, ItemKind};

/// A single-file encrypted archive, opened read-write.
pub struct Archive {
    file: File,
    path: PathBuf,
    header: ArchiveHeader,
    cipher: CipherBox,
    data_key: DataKey,
    options: ArchiveOptions,
}

impl Archive {
    /// Open an existing archive or create a new one.
    ///
    /// For an existing file the preamble's compression flag and chunk size
    /// override `options`; a failed key unwrap surfaces as `WrongPassword`.
    /// For a new file a fresh salt, key nonce, and data key are generated and
    /// the preamble is written immediately.
    pub fn open(
        path: impl AsRef<Path>,
        password: &SecretString,
        options: ArchiveOptions,
    ) -> CryptarResult<Self> {
        options.validate()?;

        let path = path.as_ref().to_path_buf();
        let exists = path.exists();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        if exists {
            let header = ArchiveHeader::read(&mut file)?;
            let kek = Kek::derive(password, &header.kdf_salt)?;
            let data_key = unwrap_data_key(&kek, &header.key_nonce, &header.wrapped_key)?;
            let cipher = CipherBox::new(&data_key);

            let options = ArchiveOptions {
                compression: header.compression,
                chunk_size: header.chunk_size,
            };
            debug!(path = %path.display(), compression = options.compression, "opened archive");

            Ok(Self {
                file,
                path,
                header,
                cipher,
                data_key,
                options,
            })
        } else {
            let mut kdf_salt = [0u8; SALT_SIZE];
            rand::thread_rng().fill_bytes(&mut kdf_salt);
            let mut key_nonce = [0u8; NONCE_SIZE];
            rand::thread_rng().fill_bytes(&mut key_nonce);

            let data_key = DataKey::generate();
            let kek = Kek::derive(password, &kdf_salt)?;
            let wrapped_key = wrap_data_key(&kek, &key_nonce, &data_key)?;

            let header = ArchiveHeader {
                version: VERSION,
                compression: options.compression,
                chunk_size: options.chunk_size,
                kdf_salt,
                key_nonce,
                wrapped_key,
            };
            header.write(&mut file)?;
            info!(path = %path.display(), "created archive");

            let cipher = CipherBox::new(&data_key);
            Ok(Self {
                file,
                path,
                header,
                cipher,
                data_key,
                options,
            })
        }
    }

    /// The resolved archive parameters (on-disk values once the file exists).
    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Append ─────────────────────────────────────────────────────────────

    /// Append one filesystem entry, relativized against `base`.
    ///
    /// The archive file itself and entries whose relative path collapses to
    /// nothing are skipped silently; symlinks and special files are refused
    /// with `UnsupportedMode`.
    pub fn add(&mut self, base: &Path, path: &Path) -> CryptarResult<()> {
        if path == base || path == self.path {
            return Ok(());
        }

        let meta = fs::symlink_metadata(path)?;
        let file_type = meta.file_type();
        if !file_type.is_file() && !file_type.is_dir() {
            return Err(CryptarError::UnsupportedMode {
                path: path.display().to_string(),
                mode: entry_mode(&meta),
            });
        }

        let Some(rel_path) = archive_path(base, path)? else {
            return Ok(());
        };

        let (size, chunks) = if file_type.is_dir() {
            (0, 0)
        } else {
            let size = meta.len();
            (size as i64, size.div_ceil(self.options.chunk_size) as i64)
        };

        let mut header = ItemHeader::new(rel_path, size, chunks, mtime_secs(&meta), entry_mode(&meta));
        debug!(path = %header.path, size, chunks, "adding item");

        self.file.seek(SeekFrom::End(0))?;
        header.write(&mut self.file, &self.cipher)?;

        if header.kind() == ItemKind::Regular && size > 0 {
            let mut src = File::open(path)?;
            body::write(
                &mut self.file,
                &mut src,
                &self.cipher,
                self.options.compression,
                self.options.chunk_size,
            )?;
        }

        Ok(())
    }

    /// Append a directory tree depth-first, reporting each visited path.
    /// Symlinks and special files are skipped with a warning instead of
    /// aborting the walk.
    pub fn add_recursive<F: FnMut(&Path)>(
        &mut self,
        base: &Path,
        path: &Path,
        mut progress: F,
    ) -> CryptarResult<()> {
        self.add_tree(base, path, &mut progress)
    }

    fn add_tree(
        &mut self,
        base: &Path,
        path: &Path,
        progress: &mut dyn FnMut(&Path),
    ) -> CryptarResult<()> {
        progress(path);

        let meta = fs::symlink_metadata(path)?;
        let file_type = meta.file_type();
        if !file_type.is_file() && !file_type.is_dir() {
            warn!(path = %path.display(), "skipping unsupported file type");
            return Ok(());
        }

        self.add(base, path)?;

        if file_type.is_dir() {
            let mut entries = fs::read_dir(path)?.collect::<io::Result<Vec<_>>>()?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                self.add_tree(base, &entry.path(), progress)?;
            }
        }

        Ok(())
    }

    // ── Enumeration ────────────────────────────────────────────────────────

    /// Walk every item in file order without decrypting bodies, delivering
    /// each to `visit`. Bodies are skipped frame by frame using the plaintext
    /// frame headers.
    fn for_each<F: FnMut(&Item) -> CryptarResult<()>>(&mut self, mut visit: F) -> CryptarResult<()> {
        self.file.seek(SeekFrom::Start(HEADER_LEN as u64))?;

        loop {
            let Some(item) = self.read_item()? else {
                return Ok(());
            };
            visit(&item)?;

            if item.header.kind() != ItemKind::Directory {
                self.skip_body(item.header.chunks)?;
            }
        }
    }

    fn read_item(&mut self) -> CryptarResult<Option<Item>> {
        match ItemHeader::read(&mut self.file, &self.cipher)? {
            None => Ok(None),
            Some(header) => {
                let offset = self.file.stream_position()?;
                Ok(Some(Item { header, offset }))
            }
        }
    }

    /// Seek past `chunks` body frames, reading only the 8-byte frame headers.
    /// Returns the position after the last frame. A torn tail (EOF inside the
    /// body) ends the skip early, mirroring header enumeration.
    fn skip_body(&mut self, chunks: i64) -> CryptarResult<u64> {
        let mut pos = self.file.stream_position()?;

        for _ in 0..chunks {
            let mut frame = [0u8; 8];
            match self.file.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let size = u32::from_le_bytes(frame[4..].try_into().expect("fixed slice"));
            pos = self.file.seek(SeekFrom::Current(i64::from(size)))?;
        }

        Ok(pos)
    }

    /// Deliver every item (optionally filtered by a shell-style glob over the
    /// archived path) to `sink`, in insertion order.
    pub fn list<F: FnMut(&Item)>(&mut self, pattern: Option<&str>, mut sink: F) -> CryptarResult<()> {
        let pattern = pattern.map(Pattern::new).transpose()?;

        self.for_each(|item| {
            match &pattern {
                Some(p) if !p.matches(&item.header.path) => {}
                _ => sink(item),
            }
            Ok(())
        })
    }

    // ── Extraction ─────────────────────────────────────────────────────────

    /// Extract every live item beneath `dest`, restoring file modification
    /// times. Tombstoned items are skipped.
    pub fn extract<F: FnMut(&Item)>(&mut self, dest: &Path, mut progress: F) -> CryptarResult<()> {
        self.file.seek(SeekFrom::Start(HEADER_LEN as u64))?;

        loop {
            let Some(item) = self.read_item()? else {
                return Ok(());
            };
            progress(&item);

            if item.header.deleted {
                if item.header.kind() != ItemKind::Directory {
                    self.skip_body(item.header.chunks)?;
                }
                continue;
            }

            let out_path = dest.join(&item.header.path);
            match item.header.kind() {
                ItemKind::Directory => {
                    fs::create_dir_all(&out_path)?;
                    restore_mtime(&File::open(&out_path)?, item.header.mtime)?;
                }
                // Unknown modes are extracted as regular files.
                ItemKind::Regular | ItemKind::Unknown => {
                    if let Some(parent) = out_path.parent() {
                        fs::create_dir_all(parent)?;
                    }

                    let out = File::create(&out_path)?;
                    let mut writer = io::BufWriter::new(out);
                    if item.header.size > 0 {
                        body::extract(
                            &mut self.file,
                            &mut writer,
                            item.header.chunks,
                            &self.cipher,
                            self.options.compression,
                        )?;
                    }
                    let out = writer.into_inner().map_err(|e| e.into_error())?;
                    restore_mtime(&out, item.header.mtime)?;
                }
            }
        }
    }

    /// Stream the plaintext byte range `[start, end)` of one item, as
    /// enumerated by [`Archive::list`]. The iteration cursor is clobbered;
    /// callers holding one must re-seek.
    pub fn stream(
        &mut self,
        item: &Item,
        dest: &mut impl Write,
        start: u64,
        end: u64,
    ) -> CryptarResult<()> {
        self.file.seek(SeekFrom::Start(item.offset))?;

        if item.header.size > 0 {
            body::extract_range(
                &mut self.file,
                dest,
                start,
                end,
                item.header.chunks,
                &self.cipher,
                self.options.compression,
                self.options.chunk_size,
            )?;
        }

        Ok(())
    }

    // ── Mutation ───────────────────────────────────────────────────────────

    /// Tombstone every live item matching `pattern`: the header is re-sealed
    /// in place with `deleted = 1`, the body is left untouched. Items already
    /// tombstoned are not re-sealed, so repeating a delete is a byte-level
    /// no-op. Returns the number of items tombstoned.
    pub fn delete(&mut self, pattern: &str) -> CryptarResult<usize> {
        let pattern = Pattern::new(pattern)?;

        let mut matches: Vec<Item> = Vec::new();
        self.for_each(|item| {
            if !item.header.deleted && pattern.matches(&item.header.path) {
                matches.push(item.clone());
            }
            Ok(())
        })?;

        for item in &mut matches {
            self.file.seek(SeekFrom::Start(item.header_offset()))?;
            item.header.deleted = true;
            item.header.write(&mut self.file, &self.cipher)?;
        }

        debug!(count = matches.len(), "tombstoned items");
        Ok(matches.len())
    }

    /// Move every live item matching `pattern` to `target`.
    ///
    /// A single match is renamed to exactly `target`; multiple matches land
    /// at `target/<base name>`. Moving multiple items onto a path that names
    /// an existing live file fails with `TargetIsFile`. Each move tombstones
    /// the original in place and appends a re-sealed header followed by a
    /// byte-for-byte copy of the body (frames are self-contained, so no
    /// re-encryption happens).
    ///
    /// Not atomic: a crash mid-way leaves some items tombstoned with their
    /// original bytes intact and some already appended. Compaction removes
    /// the tombstones.
    pub fn move_items(&mut self, pattern: &str, target: &str) -> CryptarResult<usize> {
        let pattern = Pattern::new(pattern)?;

        // Phase 1: collect matches and their body ranges.
        let mut matches: Vec<(Item, u64, u64)> = Vec::new();
        let mut target_is_file = false;

        self.file.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        loop {
            let Some(item) = self.read_item()? else {
                break;
            };
            let body_start = item.offset;
            let body_end = if item.header.kind() != ItemKind::Directory {
                self.skip_body(item.header.chunks)?
            } else {
                body_start
            };

            if !item.header.deleted {
                if item.header.path == target && item.header.kind() != ItemKind::Directory {
                    target_is_file = true;
                }
                if pattern.matches(&item.header.path) {
                    matches.push((item, body_start, body_end));
                }
            }
        }

        if matches.len() > 1 && target_is_file {
            return Err(CryptarError::TargetIsFile(target.to_string()));
        }
        let single = matches.len() == 1;

        // Phase 2: tombstone in place, append under the new path.
        let mut writer = OpenOptions::new().write(true).open(&self.path)?;
        writer.seek(SeekFrom::End(0))?;

        for (item, body_start, body_end) in &matches {
            self.file.seek(SeekFrom::Start(item.header_offset()))?;
            let mut tombstone = item.header.clone();
            tombstone.deleted = true;
            tombstone.write(&mut self.file, &self.cipher)?;

            let new_path = if single {
                target.to_string()
            } else {
                join_path(target, base_name(&item.header.path))
            };
            debug!(from = %item.header.path, to = %new_path, "moving item");

            let mut moved = item.header.clone();
            moved.path = new_path;
            moved.write(&mut writer, &self.cipher)?;

            if body_end > body_start {
                self.file.seek(SeekFrom::Start(*body_start))?;
                let mut body_bytes = (&mut self.file).take(body_end - body_start);
                io::copy(&mut body_bytes, &mut writer)?;
            }
        }

        writer.sync_all()?;
        Ok(matches.len())
    }

    /// Rewrite the file dropping every tombstoned item. Surviving items keep
    /// their exact on-disk bytes; only their positions change.
    pub fn compact(&mut self) -> CryptarResult<()> {
        // Collect the [begin, end) byte span of every tombstoned item.
        let mut deleted: Vec<(u64, u64)> = Vec::new();
        let mut cursor = HEADER_LEN as u64;

        self.file.seek(SeekFrom::Start(HEADER_LEN as u64))?;
        loop {
            let Some(item) = self.read_item()? else {
                break;
            };
            let begin = cursor;
            cursor = if item.header.kind() != ItemKind::Directory {
                self.skip_body(item.header.chunks)?
            } else {
                item.offset
            };

            if item.header.deleted {
                deleted.push((begin, cursor));
            }
        }

        let file_size = self.file.metadata()?.len();
        // Sentinel flushes the live bytes after the last tombstone.
        deleted.push((file_size, 0));

        let mut writer = OpenOptions::new().write(true).open(&self.path)?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut written: u64 = 0;
        let mut offset: u64 = 0;
        for (begin, end) in deleted {
            let mut live = (&mut self.file).take(begin - offset);
            written += io::copy(&mut live, &mut writer)?;

            offset = end;
            if offset > 0 {
                self.file.seek(SeekFrom::Start(offset))?;
            }
        }

        writer.set_len(written)?;
        writer.sync_all()?;
        info!(bytes = written, "compacted archive");
        Ok(())
    }

    /// Rotate the archive password: fresh salt and nonce, new KEK, the same
    /// data key re-wrapped, preamble overwritten in place. No item bytes are
    /// touched, so every existing seal stays valid.
    pub fn update_password(&mut self, new_password: &SecretString) -> CryptarResult<()> {
        let mut kdf_salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut kdf_salt);
        let mut key_nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut key_nonce);

        let kek = Kek::derive(new_password, &kdf_salt)?;
        let wrapped_key = wrap_data_key(&kek, &key_nonce, &self.data_key)?;

        self.header.kdf_salt = kdf_salt;
        self.header.key_nonce = key_nonce;
        self.header.wrapped_key = wrapped_key;

        self.file.seek(SeekFrom::Start(0))?;
        self.header.write(&mut self.file)?;
        self.file.sync_all()?;
        info!(path = %self.path.display(), "archive password updated");
        Ok(())
    }
}

/// Relativize `path` against `base` into the archive's path form: UTF-8,
/// forward slashes, no leading `/`. Returns `None` when nothing is left to
/// archive (the entry is `base` itself). `..` components are refused.
fn archive_path(base: &Path, path: &Path) -> CryptarResult<Option<String>> {
    let rel = path
        .strip_prefix(base)
        .map_err(|_| CryptarError::InvalidPath(path.display().to_string()))?;

    let mut parts: Vec<&str> = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| CryptarError::InvalidPath(path.display().to_string()))?;
                parts.push(part);
            }
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(CryptarError::InvalidPath(path.display().to_string()));
            }
        }
    }

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.join("/")))
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn join_path(target: &str, name: &str) -> String {
    format!("{}/{}", target.trim_end_matches('/'), name)
}

/// Apply an archived mtime to an extracted entry. Pre-epoch times are left
/// as the filesystem wrote them. A parent directory's restored time is still
/// clobbered when children are extracted into it afterwards.
fn restore_mtime(file: &File, mtime: i64) -> io::Result<()> {
    if mtime < 0 {
        return Ok(());
    }
    let modified = UNIX_EPOCH + Duration::from_secs(mtime as u64);
    file.set_times(FileTimes::new().set_modified(modified))
}

fn mtime_secs(meta: &fs::Metadata) -> i64 {
    match meta.modified().ok().map(|t| t.duration_since(UNIX_EPOCH)) {
        Some(Ok(d)) => d.as_secs() as i64,
        Some(Err(e)) => -(e.duration().as_secs() as i64),
        None => 0,
    }
}

#[cfg(unix)]
fn entry_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn entry_mode(meta: &fs::Metadata) -> u32 {
    let perms = if meta.permissions().readonly() { 0o444 } else { 0o644 };
    ItemHeader::synthesize_mode(meta.is_dir(), perms)
}
