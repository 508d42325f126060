//! Object file produced for the linker.

use std::io::{self, Write};

use indexmap::IndexMap;

use crate::{
    diag::Diagnostic,
    state::{Patch, PatchKind, Region, Section, Symbol, SymbolKind},
};

pub const MAGIC: &[u8; 7] = b"gbobj01";

#[derive(Debug, Default)]
pub struct Object {
    pub sections: IndexMap<String, Section>,
    pub symbols: IndexMap<String, Symbol>,
    pub patches: Vec<Patch>,
    pub diagnostics: Vec<Diagnostic>,
    /// Everything `PRINT*` produced, in order.
    pub printed: String,
}

impl Object {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// One string buffer; every name is stored once and referenced by offset and length.
/// Substrings of earlier names reuse their bytes.
#[derive(Debug, Default)]
struct StrHeap {
    storage: String,
}

impl StrHeap {
    fn intern(&mut self, string: &str) -> (u32, u32) {
        let index = match self.storage.find(string) {
            Some(index) => index,
            None => {
                let index = self.storage.len();
                self.storage.push_str(string);
                index
            }
        };
        (index as u32, string.len() as u32)
    }
}

fn region_tag(region: Region) -> u8 {
    match region {
        Region::Rom0 => 0,
        Region::Romx => 1,
        Region::Vram => 2,
        Region::Sram => 3,
        Region::Wram0 => 4,
        Region::Wramx => 5,
        Region::Oam => 6,
        Region::Hram => 7,
    }
}

fn symbol_tag(kind: SymbolKind) -> u8 {
    match kind {
        SymbolKind::Local => 0,
        SymbolKind::Exported => 1,
        SymbolKind::Imported => 2,
    }
}

fn patch_tag(kind: PatchKind) -> u8 {
    match kind {
        PatchKind::Byte => 0,
        PatchKind::Word => 1,
        PatchKind::Long => 2,
        PatchKind::Jr => 3,
    }
}

fn write_u32(output: &mut impl Write, value: u32) -> io::Result<()> {
    output.write_all(&value.to_le_bytes())
}

fn write_ref(output: &mut impl Write, (index, len): (u32, u32)) -> io::Result<()> {
    write_u32(output, index)?;
    write_u32(output, len)
}

fn write_opt(output: &mut impl Write, value: Option<u32>) -> io::Result<()> {
    match value {
        Some(value) => {
            output.write_all(&[1])?;
            write_u32(output, value)
        }
        None => output.write_all(&[0]),
    }
}

/// Serializes `object` to `output`.
///
/// Layout: magic, string heap (`u32` length + bytes), then sections, symbols and patches,
/// each list prefixed with a `u32` count. Names are `(offset, length)` pairs into the heap.
pub fn write_object(object: &Object, mut output: impl Write) -> io::Result<()> {
    let mut heap = StrHeap::default();
    let sections: Vec<_> = object
        .sections
        .values()
        .map(|section| {
            let file = heap.intern(&section.file);
            (heap.intern(&section.id), file, section)
        })
        .collect();
    let symbols: Vec<_> = object
        .symbols
        .values()
        .map(|symbol| {
            let section = symbol.section.as_deref().map(|name| heap.intern(name));
            (heap.intern(&symbol.name), heap.intern(&symbol.file), section, symbol)
        })
        .collect();
    let patches: Vec<_> = object
        .patches
        .iter()
        .map(|patch| (heap.intern(&patch.file), heap.intern(&patch.section), patch))
        .collect();

    output.write_all(MAGIC)?;
    write_u32(&mut output, heap.storage.len() as u32)?;
    output.write_all(heap.storage.as_bytes())?;

    write_u32(&mut output, sections.len() as u32)?;
    for (name, file, section) in sections {
        tracing::trace!(
            "writing {} bytes of section \"{}\"",
            section.bytes.len(),
            section.id
        );
        write_ref(&mut output, name)?;
        write_ref(&mut output, file)?;
        output.write_all(&[region_tag(section.region)])?;
        write_opt(&mut output, section.fixed_address.map(u32::from))?;
        write_opt(&mut output, section.bank)?;
        write_opt(&mut output, section.alignment.map(u32::from))?;
        write_u32(&mut output, section.bytes.len() as u32)?;
        output.write_all(&section.bytes)?;
    }

    write_u32(&mut output, symbols.len() as u32)?;
    for (name, file, section, symbol) in symbols {
        write_ref(&mut output, name)?;
        output.write_all(&[symbol_tag(symbol.kind)])?;
        write_ref(&mut output, file)?;
        write_u32(&mut output, symbol.line as u32)?;
        match section {
            Some(section) => {
                output.write_all(&[1])?;
                write_ref(&mut output, section)?;
            }
            None => output.write_all(&[0])?,
        }
        output.write_all(&symbol.value.to_le_bytes())?;
    }

    write_u32(&mut output, patches.len() as u32)?;
    for (file, section, patch) in patches {
        write_ref(&mut output, file)?;
        write_u32(&mut output, patch.line as u32)?;
        write_ref(&mut output, section)?;
        output.write_all(&[patch_tag(patch.kind)])?;
        write_u32(&mut output, patch.byte_offset as u32)?;
        write_u32(&mut output, patch.link_expr.len() as u32)?;
        output.write_all(&patch.link_expr)?;
    }
    Ok(())
}
