use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, TranslateError};

// Declared sizes come from the archive itself and are only a hint.
const MAX_PREALLOC: usize = 8 * 1024 * 1024;

/// An OOXML container held fully in memory, entries in archive order.
pub struct OoxmlPackage {
    pub entries: Vec<PackageEntry>,
}

pub struct PackageEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl OoxmlPackage {
    pub fn read(path: &Path) -> Result<Self> {
        let f = File::open(path)
            .map_err(|e| TranslateError::io(format!("open archive: {}", path.display()), e))?;
        Self::read_from(f)
    }

    pub fn read_from<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut zip = ZipArchive::new(reader).map_err(|e| TranslateError::zip("read zip", e))?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|e| TranslateError::zip("zip entry", e))?;
            // Entry names are forward-slash paths; anything escaping the package root is refused.
            if file.enclosed_name().is_none() {
                return Err(TranslateError::UnsafeEntryPath(file.name().to_string()));
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(initial_capacity(file.size()));
            file.read_to_end(&mut data)
                .map_err(|e| TranslateError::io(format!("read zip entry: {name}"), e))?;
            entries.push(PackageEntry {
                name,
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    /// Writes every entry in original order. Entries named in `replacements` get the new payload,
    /// all others are copied through; compression method and timestamp are kept either way.
    pub fn write_to<W: Write + Seek>(
        &self,
        sink: W,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> Result<W> {
        let mut zout = ZipWriter::new(sink);
        for ent in &self.entries {
            let data = replacements.get(&ent.name).unwrap_or(&ent.data);
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(ent.name.as_str(), opts)
                    .map_err(|e| TranslateError::zip(format!("add zip dir: {}", ent.name), e))?;
            } else {
                zout.start_file(ent.name.as_str(), opts)
                    .map_err(|e| TranslateError::zip(format!("start zip file: {}", ent.name), e))?;
                zout.write_all(data)
                    .map_err(|e| TranslateError::io(format!("write zip file: {}", ent.name), e))?;
            }
        }
        zout.finish()
            .map_err(|e| TranslateError::zip("finish zip", e))
    }
}

fn initial_capacity(declared: u64) -> usize {
    usize::try_from(declared).map_or(MAX_PREALLOC, |n| n.min(MAX_PREALLOC))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn build_zip(entries: &[(&str, &[u8], CompressionMethod)]) -> Vec<u8> {
        let mut zout = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, method) in entries {
            let opts = SimpleFileOptions::default().compression_method(*method);
            zout.start_file(*name, opts).expect("start");
            zout.write_all(data).expect("write");
        }
        zout.finish().expect("finish").into_inner()
    }

    #[test]
    fn rewrite_keeps_order_metadata_and_untouched_bytes() {
        let bytes = build_zip(&[
            ("[Content_Types].xml", b"<Types/>", CompressionMethod::Deflated),
            ("word/document.xml", b"<w:t>old</w:t>", CompressionMethod::Deflated),
            ("word/media/image1.png", b"\x89PNG raw", CompressionMethod::Stored),
        ]);
        let pkg = OoxmlPackage::read_from(Cursor::new(bytes)).expect("read");

        let mut replacements = HashMap::new();
        replacements.insert("word/document.xml".to_string(), b"<w:t>new</w:t>".to_vec());
        let out = pkg
            .write_to(Cursor::new(Vec::new()), &replacements)
            .expect("write")
            .into_inner();

        let reread = OoxmlPackage::read_from(Cursor::new(out)).expect("reread");
        let names: Vec<&str> = reread.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            ["[Content_Types].xml", "word/document.xml", "word/media/image1.png"]
        );
        assert_eq!(reread.entries[1].data, b"<w:t>new</w:t>");
        assert_eq!(reread.entries[2].data, b"\x89PNG raw");
        assert_eq!(reread.entries[2].compression, CompressionMethod::Stored);
        assert_eq!(reread.entries[0].compression, CompressionMethod::Deflated);
        assert_eq!(
            reread.entries[0].last_modified,
            pkg.entries[0].last_modified
        );
    }

    #[test]
    fn declared_size_only_bounds_preallocation() {
        assert_eq!(initial_capacity(0), 0);
        assert_eq!(initial_capacity(4096), 4096);
        assert_eq!(initial_capacity(u64::MAX), MAX_PREALLOC);
        assert_eq!(initial_capacity(MAX_PREALLOC as u64 + 1), MAX_PREALLOC);
    }

    #[test]
    fn rejects_traversal_entries() {
        let bytes = build_zip(&[("../evil.xml", b"x", CompressionMethod::Stored)]);
        let err = OoxmlPackage::read_from(Cursor::new(bytes))
            .err()
            .expect("must fail");
        assert!(matches!(err, TranslateError::UnsafeEntryPath(ref n) if n == "../evil.xml"));
    }
}
