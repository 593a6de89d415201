//! Reads relocatable ELF objects and presents their allocatable sections through the [`Section`]
//! interface. Sections get a single dense index space across all input files, in input order.
//! Relocation targets are resolved as far as a non-linker reasonably can: through each file's
//! symbol table, then through a name map of every loaded definition. References we can't pin to
//! a loaded section are reported as unresolved, which only costs signature quality.

use crate::error::Result;
use crate::section::Relocation;
use crate::section::RelocationTarget;
use crate::section::Section;
use crate::section::SectionIndex;
use crate::section::Symbol;
use anyhow::Context as _;
use hashbrown::HashMap;
use object::LittleEndian;
use object::Object;
use object::ObjectSection;
use object::ObjectSymbol;
use object::RelocationFlags;
use object::SectionFlags;
use object::SectionKind;
use object::SymbolKind;
use smallvec::SmallVec;
use std::path::Path;
use std::path::PathBuf;

type ElfFile64<'data> = object::read::elf::ElfFile64<'data, LittleEndian>;
type ElfSection64<'data, 'file> = object::read::elf::ElfSection64<'data, 'file, LittleEndian>;

/// The mapped bytes of the input files. Mostly exists so that the parsed sections have something
/// to borrow from.
pub struct InputFiles {
    files: Vec<InputFile>,
}

struct InputFile {
    path: PathBuf,
    bytes: memmap2::Mmap,
}

/// An allocatable section from one of the input files.
pub struct ElfSection<'data> {
    file_index: usize,
    name: &'data [u8],
    is_code: bool,
    has_content: bool,
    size: u64,
    content: &'data [u8],
    symbols: SmallVec<[ElfSymbol<'data>; 2]>,
    relocations: Vec<Relocation>,
}

/// A symbol defined in one of the sections. Undefined symbols belong to no section, so they
/// never appear here.
pub struct ElfSymbol<'data> {
    name: &'data [u8],
    value: u64,
    size: u64,
}

impl InputFiles {
    #[tracing::instrument(skip_all, name = "Map input files")]
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let files = paths
            .iter()
            .map(|path| {
                mmap_file(path).map(|bytes| InputFile {
                    path: path.clone(),
                    bytes,
                })
            })
            .collect::<Result<Vec<InputFile>>>()?;
        Ok(Self { files })
    }

    pub fn path(&self, file_index: usize) -> &Path {
        &self.files[file_index].path
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn mmap_file(path: &Path) -> Result<memmap2::Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open `{}`", path.display()))?;

    // Safety: Sound provided the file isn't modified while we run. We require that of our
    // callers. There's no way to build a safe mmap abstraction on Linux and reading inputs
    // through regular IO costs too much to give up on it.
    let bytes = unsafe { memmap2::Mmap::map(&file) }
        .with_context(|| format!("Failed to map `{}`", path.display()))?;

    Ok(bytes)
}

/// Parses every input file and returns its allocatable sections in input order, with symbols
/// attached and relocation targets resolved where possible.
#[tracing::instrument(skip_all, name = "Read input sections")]
pub fn candidate_sections(files: &InputFiles) -> Result<Vec<ElfSection<'_>>> {
    let mut parsed = Vec::with_capacity(files.files.len());
    let mut sections: Vec<ElfSection> = Vec::new();

    for (file_index, file) in files.files.iter().enumerate() {
        let elf = ElfFile64::parse(&file.bytes[..])
            .with_context(|| format!("Failed to parse `{}`", file.path.display()))?;

        let mut local_to_global: HashMap<object::SectionIndex, SectionIndex> = HashMap::new();
        for section in elf.sections() {
            if !is_allocatable(&section) {
                continue;
            }
            let global = SectionIndex::from_usize(sections.len());
            local_to_global.insert(section.index(), global);
            sections.push(ElfSection::parse(file_index, &section)?);
        }
        parsed.push((elf, local_to_global));
    }

    // Attach each file's defined symbols to their sections, and remember every definition by
    // name so that references into other files can be resolved below. On duplicate names the
    // first definition wins; real symbol resolution is the linker's business, not ours.
    let mut definitions: HashMap<&[u8], (SectionIndex, u64)> = HashMap::new();
    for (elf, local_to_global) in &parsed {
        for symbol in elf.symbols() {
            if !symbol.is_definition() || symbol.kind() == SymbolKind::Section {
                continue;
            }
            let Some(local) = symbol.section_index() else {
                continue;
            };
            let Some(&global) = local_to_global.get(&local) else {
                continue;
            };
            let name = symbol.name_bytes()?;
            if name.is_empty() {
                continue;
            }
            let value = symbol.address();
            sections[global.as_usize()].symbols.push(ElfSymbol {
                name,
                value,
                size: symbol.size(),
            });
            definitions.entry(name).or_insert((global, value));
        }
    }

    for (elf, local_to_global) in &parsed {
        for section in elf.sections() {
            let Some(&global) = local_to_global.get(&section.index()) else {
                continue;
            };
            let relocations = section
                .relocations()
                .map(|(offset, relocation)| {
                    convert_relocation(elf, local_to_global, &definitions, offset, &relocation)
                })
                .collect::<Result<Vec<Relocation>>>()?;
            sections[global.as_usize()].relocations = relocations;
        }
    }

    Ok(sections)
}

fn is_allocatable(section: &ElfSection64<'_, '_>) -> bool {
    match section.flags() {
        SectionFlags::Elf { sh_flags } => sh_flags & u64::from(object::elf::SHF_ALLOC) != 0,
        _ => false,
    }
}

fn convert_relocation<'data>(
    elf: &ElfFile64<'data>,
    local_to_global: &HashMap<object::SectionIndex, SectionIndex>,
    definitions: &HashMap<&[u8], (SectionIndex, u64)>,
    offset: u64,
    relocation: &object::Relocation,
) -> Result<Relocation> {
    let kind = match relocation.flags() {
        RelocationFlags::Elf { r_type } => r_type,
        _ => 0,
    };

    let target = match relocation.target() {
        object::RelocationTarget::Symbol(symbol_index) => {
            let symbol = elf.symbol_by_index(symbol_index)?;
            if let Some(local) = symbol.section_index() {
                RelocationTarget::Defined {
                    section: local_to_global.get(&local).copied(),
                    value: symbol.address(),
                }
            } else if symbol.is_undefined() {
                match definitions.get(symbol.name_bytes()?) {
                    Some(&(section, value)) => RelocationTarget::Defined {
                        section: Some(section),
                        value,
                    },
                    None => RelocationTarget::Unresolved,
                }
            } else {
                // Absolute or common symbols have a value but no section.
                RelocationTarget::Defined {
                    section: None,
                    value: symbol.address(),
                }
            }
        }
        object::RelocationTarget::Section(local) => RelocationTarget::Defined {
            section: local_to_global.get(&local).copied(),
            value: 0,
        },
        _ => RelocationTarget::Unresolved,
    };

    Ok(Relocation {
        offset,
        kind,
        addend: relocation.addend(),
        size: relocation.size().div_ceil(8),
        target,
    })
}

impl<'data> ElfSection<'data> {
    fn parse(file_index: usize, section: &ElfSection64<'data, '_>) -> Result<Self> {
        let kind = section.kind();
        let has_content = !matches!(
            kind,
            SectionKind::UninitializedData | SectionKind::UninitializedTls | SectionKind::Common
        );
        let content = if has_content { section.data()? } else { &[] };
        Ok(Self {
            file_index,
            name: section.name_bytes()?,
            is_code: kind == SectionKind::Text,
            has_content,
            size: section.size(),
            content,
            symbols: SmallVec::new(),
            relocations: Vec::new(),
        })
    }

    /// Index into the [`InputFiles`] this section was read from.
    pub fn file_index(&self) -> usize {
        self.file_index
    }
}

impl<'data> Section for ElfSection<'data> {
    type Symbol<'sym>
        = &'sym ElfSymbol<'data>
    where
        Self: 'sym;

    fn name(&self) -> &[u8] {
        self.name
    }

    fn is_code(&self) -> bool {
        self.is_code
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn has_content(&self) -> bool {
        self.has_content
    }

    fn content(&self) -> &[u8] {
        self.content
    }

    fn symbols(&self) -> impl Iterator<Item = &ElfSymbol<'data>> {
        self.symbols.iter()
    }

    fn relocations(&self) -> impl Iterator<Item = Relocation> + '_ {
        self.relocations.iter().copied()
    }
}

impl Symbol for ElfSymbol<'_> {
    fn name(&self) -> &[u8] {
        self.name
    }

    fn is_defined(&self) -> bool {
        true
    }

    fn value(&self) -> u64 {
        self.value
    }

    fn size(&self) -> u64 {
        self.size
    }
}
