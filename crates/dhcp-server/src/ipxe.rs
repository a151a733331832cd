//! iPXE bootloader selection.
//!
//! Stage 1 of the two-stage boot: the vendor PXE ROM announces its processor
//! architecture (option 93) and gets the matching iPXE binary to chainload
//! over TFTP. Stage 2 (the booted iPXE client) is handled by the DHCP
//! handlers themselves.

/// IANA processor architecture types relevant to iPXE chainloading.
pub const ARCH_INTEL_X86PC: u16 = 0;
pub const ARCH_EFI_IA32: u16 = 6;
pub const ARCH_EFI_X86_64: u16 = 9;
pub const ARCH_EFI_ARM32: u16 = 10;
pub const ARCH_EFI_ARM64: u16 = 11;

/// Map a client-architecture code to an iPXE bootloader filename.
///
/// Unknown architectures get `None`; the caller decides whether that drops
/// the boot options or the whole response.
pub fn bootfile_for_arch(code: u16) -> Option<&'static str> {
    match code {
        // iPXE legacy 32-bit x86 bootloader
        ARCH_INTEL_X86PC => Some("undionly.kpxe"),
        // iPXE EFI 32-bit bootloader
        ARCH_EFI_IA32 => Some("ipxe-i386.efi"),
        // iPXE 64-bit x86 bootloader
        ARCH_EFI_X86_64 => Some("ipxe-x86_64.efi"),
        // iPXE EFI 32-bit ARM bootloader
        ARCH_EFI_ARM32 => Some("ipxe-arm32.efi"),
        // iPXE EFI 64-bit ARM bootloader
        ARCH_EFI_ARM64 => Some("ipxe-arm64.efi"),
        _ => None,
    }
}

/// The user-class value an iPXE client presents once it is running.
pub const IPXE_USER_CLASS: &str = "iPXE";

/// Set the stage-1 chainload bootfile on a v4 response.
///
/// Returns false when the client presented no architecture or an unknown
/// one; the response is left without boot options in that case.
pub fn serve_bootloader(
    req: &dhcproto::v4::Message,
    resp: &mut dhcproto::v4::Message,
) -> bool {
    use dhcproto::v4::DhcpOption;
    use tracing::error;

    match crate::options::client_arch_code(req) {
        Some(code) => match bootfile_for_arch(code) {
            Some(bootfile) => {
                resp.opts_mut()
                    .insert(DhcpOption::BootfileName(bootfile.to_string().into_bytes()));
                true
            }
            None => {
                error!("no iPXE bootloader available for unknown architecture: {code}");
                false
            }
        },
        None => {
            error!("client did not present an architecture, unable to provide correct iPXE bootloader");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_every_supported_architecture() {
        assert_eq!(bootfile_for_arch(ARCH_INTEL_X86PC), Some("undionly.kpxe"));
        assert_eq!(bootfile_for_arch(ARCH_EFI_IA32), Some("ipxe-i386.efi"));
        assert_eq!(bootfile_for_arch(ARCH_EFI_X86_64), Some("ipxe-x86_64.efi"));
        assert_eq!(bootfile_for_arch(ARCH_EFI_ARM32), Some("ipxe-arm32.efi"));
        assert_eq!(bootfile_for_arch(ARCH_EFI_ARM64), Some("ipxe-arm64.efi"));
    }

    #[test]
    fn unknown_architecture_has_no_bootfile() {
        assert_eq!(bootfile_for_arch(2), None); // EFI Itanium
        assert_eq!(bootfile_for_arch(0xffff), None);
    }
}
