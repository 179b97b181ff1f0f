use goblin::elf::header::ET_EXEC;
use goblin::elf::program_header::{PT_DYNAMIC, PT_INTERP, PT_LOAD, PT_NOTE};
use goblin::elf::Elf;

const ENTRY_MIN_64: u64 = 0x0040_0000;
const ENTRY_MIN_32: u64 = 0x0804_8000;
const PACKED_ENTROPY_THRESHOLD: f64 = 6.8;

fn is_rwx(flags: u32) -> bool {
    const PF_X: u32 = 1;
    const PF_W: u32 = 2;
    const PF_R: u32 = 4;
    flags & (PF_R | PF_W | PF_X) == (PF_R | PF_W | PF_X)
}

fn is_rx(flags: u32) -> bool {
    const PF_X: u32 = 1;
    const PF_R: u32 = 4;
    flags & (PF_R | PF_X) == (PF_R | PF_X)
}

fn is_writable(flags: u32) -> bool {
    const PF_W: u32 = 2;
    flags & PF_W != 0
}

/// Shannon entropy over a byte slice, in bits per byte (0.0 .. 8.0).
pub fn data_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let len = data.len() as f64;
    let mut entropy = len.log2();
    for &c in counts.iter() {
        if c == 0 {
            continue;
        }
        let c = c as f64;
        entropy -= (c * c.log2()) / len;
    }
    entropy
}

/// First program header (by load order) whose VA range covers `addr`.
pub fn segment_covering<'a>(elf: &'a Elf, addr: u64) -> Option<&'a goblin::elf::ProgramHeader> {
    elf.program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .find(|ph| addr >= ph.p_vaddr && addr < ph.p_vaddr + ph.p_memsz)
}

pub fn statically_linked(elf: &Elf) -> bool {
    if elf.program_headers.len() < 4 {
        return true;
    }
    let interp_is_second = elf
        .program_headers
        .get(1)
        .map(|ph| ph.p_type == PT_INTERP)
        .unwrap_or(false);
    let looks_exec = elf.header.e_type == ET_EXEC as u16 && !interp_is_second;
    if looks_exec {
        return true;
    }
    if elf.section_headers.is_empty() {
        return true;
    }
    let entry_min = if elf.is_64 { ENTRY_MIN_64 } else { ENTRY_MIN_32 };
    if elf.header.e_entry < entry_min {
        return true;
    }
    let has_note = elf.program_headers.iter().any(|ph| ph.p_type == PT_NOTE);
    if !has_note {
        return true;
    }
    elf.program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .any(|ph| is_rwx(ph.p_flags))
}

pub fn dynamically_linked(elf: &Elf) -> bool {
    let has_dynamic = elf.program_headers.iter().any(|ph| ph.p_type == PT_DYNAMIC);
    let interp_is_second = elf
        .program_headers
        .get(1)
        .map(|ph| ph.p_type == PT_INTERP)
        .unwrap_or(false);
    let has_note = elf.program_headers.iter().any(|ph| ph.p_type == PT_NOTE);
    let no_rwx = !elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .any(|ph| is_rwx(ph.p_flags));

    has_dynamic && interp_is_second && !elf.section_headers.is_empty() && has_note && no_rwx
}

/// Any PT_LOAD segment whose file-backed bytes have entropy at/above the
/// packed threshold.
pub fn packed_segment(elf: &Elf, file_bytes: &[u8]) -> bool {
    elf.program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD && ph.p_filesz > 0)
        .any(|ph| {
            let start = ph.p_offset as usize;
            let end = start.saturating_add(ph.p_filesz as usize);
            match file_bytes.get(start..end.min(file_bytes.len())) {
                Some(slice) if !slice.is_empty() => {
                    data_entropy(slice) >= PACKED_ENTROPY_THRESHOLD
                }
                _ => false,
            }
        })
}

/// A target address is flagged as a control-flow hijack if its covering
/// segment is writable, is not the first R|X segment, or the address lies
/// outside it entirely (no covering PT_LOAD found).
pub fn detect_control_flow_hijacking(elf: &Elf, addr: u64) -> bool {
    let Some(segment) = segment_covering(elf, addr) else {
        return true;
    };
    if is_writable(segment.p_flags) {
        return true;
    }
    let first_rx = elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .find(|ph| is_rx(ph.p_flags));
    match first_rx {
        Some(first) if first.p_vaddr == segment.p_vaddr => false,
        _ => true,
    }
}

/// Read `.init_array` bounded by the section's own size, word size 4 or 8
/// by ELF class, little-endian.
pub fn init_array_entries(elf: &Elf, file_bytes: &[u8]) -> Vec<u64> {
    let Some(shdr) = elf
        .section_headers
        .iter()
        .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(".init_array"))
    else {
        return Vec::new();
    };

    let word_size: usize = if elf.is_64 { 8 } else { 4 };
    let start = shdr.sh_offset as usize;
    let end = start.saturating_add(shdr.sh_size as usize);
    let Some(bytes) = file_bytes.get(start..end.min(file_bytes.len())) else {
        return Vec::new();
    };

    bytes
        .chunks_exact(word_size)
        .map(|chunk| {
            if word_size == 8 {
                u64::from_le_bytes(chunk.try_into().unwrap())
            } else {
                u32::from_le_bytes(chunk.try_into().unwrap()) as u64
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_of_uniform_zero_bytes_is_zero() {
        let data = vec![0u8; 4096];
        assert_eq!(data_entropy(&data), 0.0);
    }

    #[test]
    fn entropy_is_bounded_by_eight() {
        let data: Vec<u8> = (0..=255u8).cycle().take(8192).collect();
        let e = data_entropy(&data);
        assert!(e > 0.0 && e <= 8.0);
    }

    #[test]
    fn entropy_is_permutation_invariant() {
        let mut data: Vec<u8> = (0..=255u8).collect();
        let e1 = data_entropy(&data);
        data.reverse();
        let e2 = data_entropy(&data);
        assert!((e1 - e2).abs() < 1e-9);
    }
}
