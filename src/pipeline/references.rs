use crate::runtime::config::KernelPackage;

const X86_REFERENCES: &[&str] = &["Cosmos.CPU_Plugs", "Cosmos.CPU_Asm", "Cosmos.Plugs.TapRoot"];

const CORE_REFERENCES: &[&str] = &[
    "Cosmos.Core_Plugs",
    "Cosmos.Core_Asm",
    "Cosmos.System2_Plugs",
    "Cosmos.Debug.Kernel.Plugs.Asm",
];

/// Support libraries compiled alongside a kernel for `package`.
pub fn reference_set(package: KernelPackage) -> &'static [&'static str] {
    match package {
        KernelPackage::X86 => X86_REFERENCES,
        KernelPackage::Core => CORE_REFERENCES,
    }
}
