//! Mapping between ELF [`Machine`](crate::Machine) values and the architecture
//! tokens used by platform ABI policy names (`manylinux_2_28_x86_64`,
//! `musllinux_1_2_aarch64`, ...).

use crate::ByteOrder;
use crate::Class;
use crate::Machine;

/// The architecture token a policy file keys its `manylinux_*`/`musllinux_*` tag
/// suffix on, e.g. `"x86_64"` or `"aarch64"`.
///
/// Returns `None` for machines with no corresponding wheel platform tag.
pub fn policy_arch(machine: Machine, class: Class, byte_order: ByteOrder) -> Option<&'static str> {
    use ByteOrder::*;
    use Class::*;
    use Machine::*;
    Some(match (machine, class, byte_order) {
        (X86_64, Elf64, LittleEndian) => "x86_64",
        (I386, Elf32, LittleEndian) => "i686",
        (Aarch64, Elf64, LittleEndian) => "aarch64",
        (Arm, Elf32, LittleEndian) => "armv7l",
        (Ppc64, Elf64, BigEndian) => "ppc64",
        (Ppc64, Elf64, LittleEndian) => "ppc64le",
        (S390, Elf64, BigEndian) => "s390x",
        (Riscv, Elf64, LittleEndian) => "riscv64",
        (Loongarch, Elf64, LittleEndian) => "loongarch64",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_amd64() {
        assert_eq!(
            policy_arch(Machine::X86_64, Class::Elf64, ByteOrder::LittleEndian),
            Some("x86_64")
        );
    }

    #[test]
    fn rejects_mismatched_class() {
        assert_eq!(
            policy_arch(Machine::X86_64, Class::Elf32, ByteOrder::LittleEndian),
            None
        );
    }

    #[test]
    fn maps_ppc64_by_byte_order() {
        assert_eq!(
            policy_arch(Machine::Ppc64, Class::Elf64, ByteOrder::LittleEndian),
            Some("ppc64le")
        );
        assert_eq!(
            policy_arch(Machine::Ppc64, Class::Elf64, ByteOrder::BigEndian),
            Some("ppc64")
        );
    }
}
