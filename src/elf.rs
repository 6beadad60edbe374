use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::constants::*;
use crate::ByteOrder;
use crate::Class;
use crate::DynamicTable;
use crate::DynamicTag;
use crate::ElfRead;
use crate::ElfSeek;
use crate::Error;
use crate::Header;
use crate::Machine;
use crate::ProgramHeader;
use crate::SectionHeader;
use crate::SectionKind;
use crate::SegmentKind;
use crate::StringTable;
use crate::SymbolTable;
use crate::SymbolVersion;

/// One undefined `.dynsym` entry together with whatever the binary records about
/// which library and version is expected to supply it.
///
/// This is the one place every other view of a file's symbol imports is derived
/// from: the per-library `{soname: {versions}}` map handed to the dependency
/// resolver and the flat plain-name set the ABI policy's blacklist check reads both
/// project from this table, so a symbol referenced with and without a version token
/// (`deflate_old` vs `deflate_old@ZLIB_1.0`) is always the same entry underneath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolImport {
    /// The symbol's plain name, with no `@version` suffix.
    pub name: String,
    /// The soname of the library expected to define this symbol, if the binary's
    /// `.gnu.version_r` records one.
    pub library: Option<String>,
    /// The version token required of that definition, if any.
    pub version: Option<SymbolVersion>,
}

/// A parsed ELF shared object or executable: its header, segments, sections, and
/// everything needed to inspect the dynamic linking information embedded in it.
///
/// Reading is read-only and streaming: [`Elf::load`] seeks to each table it needs in
/// turn and never holds the whole file in memory.
#[derive(Debug)]
pub struct Elf {
    /// File header.
    pub header: Header,
    /// Program header (file segment list).
    pub segments: ProgramHeader,
    /// Section header (file section list).
    pub sections: SectionHeader,
    dynamic: Option<DynamicTable>,
    dynstr: Option<StringTable>,
    symbol_imports: Vec<SymbolImport>,
    page_size: u64,
}

impl Elf {
    /// Read the ELF structural tables (header, segments, sections) from `reader`,
    /// without validating their internal consistency.
    pub fn read_unchecked<R: ElfRead + ElfSeek>(
        reader: &mut R,
        page_size: u64,
    ) -> Result<Self, Error> {
        reader.seek(0)?;
        let header = Header::read(reader)?;
        reader.seek(header.program_header_offset)?;
        let segments = ProgramHeader::read(
            reader,
            header.class,
            header.byte_order,
            header.program_header_len(),
        )?;
        reader.seek(header.section_header_offset)?;
        let sections = SectionHeader::read(
            reader,
            header.class,
            header.byte_order,
            header.section_header_len(),
        )?;
        Ok(Self {
            header,
            segments,
            sections,
            dynamic: None,
            dynstr: None,
            symbol_imports: Vec::new(),
            page_size,
        })
    }

    /// Read and validate an ELF file, loading every table this crate cares about:
    /// the dynamic table, the dynamic string table, and the GNU symbol version
    /// tables (if present).
    ///
    /// `page_size` is only used to size the [`Elf::page_size`] accessor; it does not
    /// affect the tables read.
    pub fn load<R: ElfRead + ElfSeek>(reader: &mut R, page_size: u64) -> Result<Self, Error> {
        let mut elf = Self::read_unchecked(reader, page_size)?;
        elf.dynamic = elf.read_dynamic_table(reader)?;
        elf.dynstr = elf.read_dynamic_string_table(reader)?;
        elf.symbol_imports = elf.read_symbol_imports(reader)?;
        Ok(elf)
    }

    fn read_dynamic_table<R: ElfRead + ElfSeek>(
        &self,
        reader: &mut R,
    ) -> Result<Option<DynamicTable>, Error> {
        let Some(section) = self.sections.find_by_kind(SectionKind::Dynamic) else {
            return Ok(None);
        };
        Ok(Some(section.read_content(
            reader,
            self.header.class,
            self.header.byte_order,
        )?))
    }

    fn read_dynamic_string_table<R: ElfRead + ElfSeek>(
        &self,
        reader: &mut R,
    ) -> Result<Option<StringTable>, Error> {
        let Some(names) = self.read_section_names(reader)? else {
            return Ok(None);
        };
        let Some(section) = self.sections.iter().find(|section| {
            names.get_string(section.name_offset as usize) == Some(DYNSTR_SECTION)
        }) else {
            return Ok(None);
        };
        Ok(Some(section.read_content(
            reader,
            self.header.class,
            self.header.byte_order,
        )?))
    }

    /// Read the section name string table (`.shstrtab`).
    pub fn read_section_names<R: ElfRead + ElfSeek>(
        &self,
        reader: &mut R,
    ) -> Result<Option<StringTable>, Error> {
        let Some(section) = self.sections.get(self.header.section_names_index as usize) else {
            return Ok(None);
        };
        Ok(Some(section.read_content(
            reader,
            self.header.class,
            self.header.byte_order,
        )?))
    }

    fn find_section_by_name<R: ElfRead + ElfSeek>(
        &self,
        reader: &mut R,
        name: &core::ffi::CStr,
    ) -> Result<Option<Vec<u8>>, Error> {
        let Some(names) = self.read_section_names(reader)? else {
            return Ok(None);
        };
        let Some(section) = self
            .sections
            .iter()
            .find(|section| names.get_string(section.name_offset as usize) == Some(name))
        else {
            return Ok(None);
        };
        Ok(Some(section.read_content(
            reader,
            self.header.class,
            self.header.byte_order,
        )?))
    }

    fn read_symbol_imports<R: ElfRead + ElfSeek>(
        &self,
        reader: &mut R,
    ) -> Result<Vec<SymbolImport>, Error> {
        let Some(dynstr) = self.dynstr.as_ref() else {
            return Ok(Vec::new());
        };
        let Some(dynsym_section) = self.sections.find_by_kind(SectionKind::DynamicSymbolTable)
        else {
            return Ok(Vec::new());
        };
        let dynsym: SymbolTable = dynsym_section.read_content(
            reader,
            self.header.class,
            self.header.byte_order,
        )?;

        let versym_content = self.find_section_by_name(reader, VERSYM_SECTION)?;
        let versyms = versym_content
            .map(|content| crate::versions::read_version_symbols(&content, self.header.byte_order))
            .transpose()?;

        let version_requirements = match self.find_section_by_name(reader, VERNEED_SECTION)? {
            Some(content) => {
                crate::versions::read_version_requirements(&content, self.header.byte_order, dynstr)?
            }
            None => Vec::new(),
        };
        let mut by_versym_index: BTreeMap<u16, &crate::versions::VersionRequirement> =
            BTreeMap::new();
        for requirement in version_requirements.iter() {
            by_versym_index.insert(requirement.versym_index, requirement);
        }

        let mut imports = Vec::new();
        for (i, symbol) in dynsym.iter().enumerate() {
            if !symbol.is_undefined() {
                continue;
            }
            let Some(name) = dynstr.get_str(symbol.name_offset as usize) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let requirement = versyms
                .as_ref()
                .and_then(|versyms| versyms.get(i))
                .and_then(|index| (*index > VER_NDX_GLOBAL).then_some(*index))
                .and_then(|index| by_versym_index.get(&index));
            imports.push(SymbolImport {
                name: name.to_owned(),
                library: requirement.map(|r| r.library.clone()),
                version: requirement.map(|r| r.version.clone()),
            });
        }
        Ok(imports)
    }

    /// The sonames of the libraries this file needs, in `DT_NEEDED` order.
    pub fn needed(&self) -> Vec<&str> {
        let Some(dynamic) = self.dynamic.as_ref() else {
            return Vec::new();
        };
        let Some(dynstr) = self.dynstr.as_ref() else {
            return Vec::new();
        };
        dynamic
            .get_all(DynamicTag::Needed)
            .filter_map(|offset| dynstr.get_str(offset as usize))
            .collect()
    }

    /// This file's own `DT_SONAME`, if it is a shared object that declares one.
    pub fn soname(&self) -> Option<&str> {
        let offset = self.dynamic.as_ref()?.get(DynamicTag::SharedObjectName)?;
        self.dynstr.as_ref()?.get_str(offset as usize)
    }

    /// The raw, uninterpolated `DT_RPATH` search path entries, in order.
    pub fn rpath(&self) -> Vec<&str> {
        self.search_path(DynamicTag::Rpath)
    }

    /// The raw, uninterpolated `DT_RUNPATH` search path entries, in order.
    pub fn runpath(&self) -> Vec<&str> {
        self.search_path(DynamicTag::Runpath)
    }

    fn search_path(&self, tag: DynamicTag) -> Vec<&str> {
        let Some(offset) = self.dynamic.as_ref().and_then(|d| d.get(tag)) else {
            return Vec::new();
        };
        let Some(raw) = self.dynstr.as_ref().and_then(|t| t.get_str(offset as usize)) else {
            return Vec::new();
        };
        raw.split(':').filter(|s| !s.is_empty()).collect()
    }

    /// The program interpreter (dynamic loader) path, read from the `PT_INTERP`
    /// segment if one is present.
    pub fn interpreter<R: ElfRead + ElfSeek>(&self, reader: &mut R) -> Result<Option<String>, Error> {
        let Some(segment) = self
            .segments
            .iter()
            .find(|segment| segment.kind == SegmentKind::Interpreter)
        else {
            return Ok(None);
        };
        let mut bytes = segment.read_content(reader)?;
        if bytes.last() == Some(&0) {
            bytes.pop();
        }
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| Error::MalformedElf("non-UTF8 interpreter path"))
    }

    /// Every undefined symbol import, with its resolved library and version, if known.
    pub fn symbol_imports(&self) -> &[SymbolImport] {
        &self.symbol_imports
    }

    /// Versioned symbol requirements grouped by the soname of the library expected
    /// to supply them.
    pub fn versioned_symbols(&self) -> BTreeMap<&str, BTreeSet<&SymbolVersion>> {
        let mut map: BTreeMap<&str, BTreeSet<&SymbolVersion>> = BTreeMap::new();
        for import in self.symbol_imports.iter() {
            if let (Some(library), Some(version)) = (import.library.as_deref(), import.version.as_ref())
            {
                map.entry(library).or_default().insert(version);
            }
        }
        map
    }

    /// The flat set of plain (unversioned) names imported from external libraries.
    pub fn imported_symbol_names(&self) -> BTreeSet<&str> {
        self.symbol_imports
            .iter()
            .map(|import| import.name.as_str())
            .collect()
    }

    /// Plain names imported specifically from `library`, for policy blacklist checks.
    pub fn imported_symbol_names_from(&self, library: &str) -> BTreeSet<&str> {
        self.symbol_imports
            .iter()
            .filter(|import| import.library.as_deref() == Some(library))
            .map(|import| import.name.as_str())
            .collect()
    }

    /// The machine architecture this file was built for.
    pub fn arch(&self) -> Machine {
        self.header.machine
    }

    /// Bitness and byte order.
    pub fn class(&self) -> Class {
        self.header.class
    }

    /// Byte order.
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Page size used to validate segment alignment, as supplied on construction.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }
}
