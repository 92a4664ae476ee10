//! ZIP archive helpers for xlsx packages.
//! The whole package is held in memory so edited parts can be swapped in and the
//! archive rewritten without touching parts this crate does not understand.

use crate::error::InvoiceSheetError;
use std::io::Read;
use std::io::Seek;
use std::io::Write;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipArchive;
use zip::ZipWriter;

/// A single named part of the package
#[derive(Clone, Debug)]
pub(crate) struct Part {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
}

/// Ordered collection of package parts
#[derive(Clone, Debug, Default)]
pub(crate) struct Package {
    parts: Vec<Part>,
}

impl Package {
    /// Reads every file entry of the archive, keeping the archive order.
    pub(crate) fn read<RS: Read + Seek>(reader: RS) -> Result<Package, InvoiceSheetError> {
        let mut zip = ZipArchive::new(reader)?;
        let mut parts = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let mut file = zip.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_owned();
            let mut data = Vec::new();
            file.read_to_end(&mut data)?;
            parts.push(Part { name, data });
        }
        Ok(Package { parts })
    }

    /// Writes every part into a new deflated archive.
    pub(crate) fn write<WS: Write + Seek>(&self, writer: WS) -> Result<WS, InvoiceSheetError> {
        let mut zip = ZipWriter::new(writer);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for part in &self.parts {
            zip.start_file(part.name.as_str(), options)?;
            zip.write_all(&part.data)?;
        }
        Ok(zip.finish()?)
    }

    /// Finds a part by name (case-insensitive, path separator agnostic,
    /// leading slash ignored)
    pub(crate) fn get(&self, name: &str) -> Option<&Part> {
        let pattern = normalize(name);
        self.parts
            .iter()
            .find(|part| pattern.eq_ignore_ascii_case(&normalize(&part.name)))
    }

    /// Returns the part decoded as UTF-8 text
    pub(crate) fn text(&self, name: &str) -> Result<Option<&str>, InvoiceSheetError> {
        self.get(name)
            .map(|part| std::str::from_utf8(&part.data))
            .transpose()
            .map_err(InvoiceSheetError::from)
    }

    /// Replaces the content of an existing part or appends a new one
    pub(crate) fn put(&mut self, name: &str, data: Vec<u8>) {
        let pattern = normalize(name);
        match self
            .parts
            .iter_mut()
            .find(|part| pattern.eq_ignore_ascii_case(&normalize(&part.name)))
        {
            Some(part) => part.data = data,
            None => self.parts.push(Part {
                name: pattern,
                data,
            }),
        }
    }

    /// Removes a part, returning whether it existed
    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let pattern = normalize(name);
        let before = self.parts.len();
        self.parts
            .retain(|part| !pattern.eq_ignore_ascii_case(&normalize(&part.name)));
        before != self.parts.len()
    }
}

fn normalize(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds an in-memory zip archive from (name, content) pairs.
    pub(crate) fn zip_bytes(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, content) in parts {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn package_lookup_ignores_case_and_separators() {
        let bytes = zip_bytes(&[("xl/workbook.xml", "<workbook/>"), ("[Content_Types].xml", "<Types/>")]);
        let package = Package::read(Cursor::new(bytes)).unwrap();
        assert!(package.get("XL\\Workbook.xml").is_some());
        assert!(package.get("/xl/workbook.xml").is_some());
        assert_eq!(package.text("xl/workbook.xml").unwrap(), Some("<workbook/>"));
        assert!(package.get("xl/styles.xml").is_none());
    }

    #[test]
    fn package_rewrites_replaced_parts() {
        let bytes = zip_bytes(&[("a.xml", "<a/>"), ("b.xml", "<b/>")]);
        let mut package = Package::read(Cursor::new(bytes)).unwrap();
        package.put("a.xml", b"<a>1</a>".to_vec());
        assert!(package.remove("b.xml"));
        assert!(!package.remove("b.xml"));

        let written = package.write(Cursor::new(Vec::new())).unwrap().into_inner();
        let reread = Package::read(Cursor::new(written)).unwrap();
        assert_eq!(reread.text("a.xml").unwrap(), Some("<a>1</a>"));
        assert!(reread.get("b.xml").is_none());
    }
}
