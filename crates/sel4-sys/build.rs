// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Derive seL4 configuration constants and ABI numbering for the bindings.
// Author: Lukas Bower
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const CONFIG_CANDIDATES: &[&str] = &[
    ".config",
    "kernel/.config",
    "KernelConfig",
    "kernel/KernelConfig",
    "kernel/gen_config/KernelConfig",
    "kernel/gen_config/kernel/gen_config.h",
    "kernel/gen_config/kernel/KernelConfig",
    "kernel/gen_config/KernelConfigGenerated.cmake",
    "kernel/gen_config/kernel/KernelConfigGenerated.cmake",
    "kernel/gen_config/kernel_all.cmake",
];

/// Default of `CONFIG_MAX_NUM_BOOTINFO_UNTYPED_CAPS` in upstream seL4.
const DEFAULT_MAX_BOOTINFO_UNTYPEDS: usize = 230;

/// Generated libsel4 headers that define the syscall and invocation enums.
const ABI_HEADERS: &[&str] = &["sel4/syscall.h", "sel4/invocation.h"];

/// Numbering of an upstream MCS kernel without `CONFIG_HARDWARE_DEBUG_API`.
/// Host builds only; no system call is ever issued there.
const HOST_ABI: &str = "\
pub type seL4_Syscall_ID = core::ffi::c_int;
pub const seL4_SysCall: seL4_Syscall_ID = -1;
pub const seL4_SysRecv: seL4_Syscall_ID = -7;
pub const seL4_SysDebugPutChar: seL4_Syscall_ID = -12;
pub const seL4_SysDebugNameThread: seL4_Syscall_ID = -17;
pub type invocation_label = core::ffi::c_uint;
pub const TCBReadRegisters: invocation_label = 2;
pub const TCBSuspend: invocation_label = 12;
pub const SchedContextBind: invocation_label = 31;
pub const SchedContextUnbindObject: invocation_label = 33;
";

fn main() {
    println!("cargo:rustc-check-cfg=cfg(sel4_config_kernel_mcs)");
    println!("cargo:rerun-if-env-changed=SEL4_BUILD_DIR");
    println!("cargo:rerun-if-env-changed=SEL4_BUILD");
    println!("cargo:rerun-if-env-changed=SEL4_SOURCE_DIR");

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(error) => panic!("OUT_DIR not set: {error}"),
    };
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "none" {
        write_config_constants(&out_dir, DEFAULT_MAX_BOOTINFO_UNTYPEDS)
            .unwrap_or_else(|error| panic!("{error}"));
        write_host_abi(&out_dir).unwrap_or_else(|error| panic!("{error}"));
        return;
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let build_dir = env::var("SEL4_BUILD_DIR")
        .or_else(|_| env::var("SEL4_BUILD"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| manifest_dir.join("../../seL4/build"));
    let config_sources = load_config_files(&build_dir);

    let max_bootinfo_untypeds = match parse_config_usize(
        &config_sources,
        "CONFIG_MAX_NUM_BOOTINFO_UNTYPED_CAPS",
    ) {
        Ok(Some(value)) => value,
        Ok(None) => {
            println!(
                "cargo:warning=CONFIG_MAX_NUM_BOOTINFO_UNTYPED_CAPS not found under {}; using {}",
                build_dir.display(),
                DEFAULT_MAX_BOOTINFO_UNTYPEDS
            );
            DEFAULT_MAX_BOOTINFO_UNTYPEDS
        }
        Err(message) => panic!("{message}"),
    };
    write_config_constants(&out_dir, max_bootinfo_untypeds)
        .unwrap_or_else(|error| panic!("{error}"));
    eprintln!("sel4-sys: MAX_BOOTINFO_UNTYPEDS = {max_bootinfo_untypeds}");

    // Missing configuration is treated as MCS; an explicit non-MCS kernel is rejected in lib.rs.
    if probe_config_flag(&config_sources, "CONFIG_KERNEL_MCS") != Some(false) {
        println!("cargo:rustc-cfg=sel4_config_kernel_mcs");
    }

    generate_abi(&build_dir, &out_dir);
}

fn load_config_files(root: &Path) -> Vec<(PathBuf, String)> {
    let mut sources = Vec::new();
    for relative in CONFIG_CANDIDATES {
        let candidate = root.join(relative);
        println!("cargo:rerun-if-changed={}", candidate.display());
        if let Ok(contents) = fs::read_to_string(&candidate) {
            sources.push((candidate, contents));
        }
    }
    sources
}

fn probe_config_flag(sources: &[(PathBuf, String)], flag: &str) -> Option<bool> {
    sources
        .iter()
        .find_map(|(_, contents)| parse_config_value(contents, flag))
        .and_then(|value| match value.as_str() {
            "y" | "Y" | "1" | "ON" | "TRUE" | "YES" => Some(true),
            "n" | "N" | "0" | "OFF" | "FALSE" | "NO" => Some(false),
            _ => None,
        })
}

fn parse_config_usize(sources: &[(PathBuf, String)], key: &str) -> Result<Option<usize>, String> {
    let Some(raw) = sources
        .iter()
        .find_map(|(_, contents)| parse_config_value(contents, key))
    else {
        return Ok(None);
    };
    raw.parse::<usize>()
        .map(Some)
        .map_err(|error| format!("Unable to parse {key} as integer (value: {raw}): {error}"))
}

/// Value of `key` from a Kconfig, CMake or generated header line.
fn parse_config_value(contents: &str, key: &str) -> Option<String> {
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with("/* disabled:") {
            continue;
        }
        if line.starts_with('#') && line.contains(key) && line.contains("is not set") {
            return Some("n".to_owned());
        }
        if let Some(rest) = line.strip_prefix("#define ") {
            let mut parts = rest.split_whitespace();
            if parts.next() == Some(key) {
                return Some(trim_config_value(parts.next().unwrap_or("1")));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("set(") {
            let mut parts = rest.trim_end_matches(')').split_whitespace();
            if parts.next() == Some(key) {
                return parts.next().map(trim_config_value);
            }
            continue;
        }
        if let Some((name, value)) = line.split_once('=') {
            if name.trim() == key {
                return Some(trim_config_value(value.trim()));
            }
        }
    }
    None
}

fn trim_config_value(raw: &str) -> String {
    raw.trim_matches(&['"', '\''][..]).to_string()
}

fn write_config_constants(out_dir: &Path, max_bootinfo_untypeds: usize) -> Result<(), String> {
    let dest = out_dir.join("sel4_config_consts.rs");
    let contents = format!(
        "// @generated by crates/sel4-sys/build.rs\n\
         /// Length of `seL4_BootInfo::untypedList`.\n\
         pub const MAX_BOOTINFO_UNTYPEDS: usize = {max_bootinfo_untypeds};\n"
    );
    fs::write(&dest, contents)
        .map_err(|error| format!("Failed to write {}: {}", dest.display(), error))
}

fn write_host_abi(out_dir: &Path) -> Result<(), String> {
    let dest = out_dir.join("sel4_abi.rs");
    let contents = format!("// @generated by crates/sel4-sys/build.rs (host)\n{HOST_ABI}");
    fs::write(&dest, contents)
        .map_err(|error| format!("Failed to write {}: {}", dest.display(), error))
}

fn abi_include_dirs(build_dir: &Path) -> Vec<PathBuf> {
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let arch = match target_arch.as_str() {
        "riscv64" => "riscv",
        _ => "arm",
    };
    let word_bits = env::var("CARGO_CFG_TARGET_POINTER_WIDTH").unwrap_or_else(|_| "64".to_owned());

    let mut dirs = vec![
        build_dir.join("libsel4/include"),
        build_dir.join(format!("libsel4/sel4_arch_include/{target_arch}")),
        build_dir.join(format!("libsel4/arch_include/{arch}")),
        build_dir.join("libsel4/autoconf"),
        build_dir.join("libsel4/gen_config"),
        build_dir.join("kernel/gen_config"),
        // Installed SDK layout keeps every header under one directory.
        build_dir.join("include"),
    ];
    if let Ok(source) = env::var("SEL4_SOURCE_DIR") {
        let libsel4 = PathBuf::from(source).join("libsel4");
        dirs.extend([
            libsel4.join("include"),
            libsel4.join(format!("sel4_arch_include/{target_arch}")),
            libsel4.join(format!("arch_include/{arch}")),
            libsel4.join(format!("mode_include/{word_bits}")),
        ]);
    }
    dirs.retain(|dir| dir.is_dir());
    dirs
}

/// Run bindgen over the kernel's generated syscall and invocation headers.
fn generate_abi(build_dir: &Path, out_dir: &Path) {
    let include_dirs = abi_include_dirs(build_dir);
    for header in ABI_HEADERS {
        let Some(found) = include_dirs
            .iter()
            .map(|dir| dir.join(header))
            .find(|path| path.is_file())
        else {
            panic!(
                "Could not locate <{header}> for the seL4 build under {}; checked: {}",
                build_dir.display(),
                include_dirs
                    .iter()
                    .map(|dir| dir.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        };
        println!("cargo:rerun-if-changed={}", found.display());
    }

    let wrapper = out_dir.join("sel4_abi.h");
    let mut wrapper_file =
        fs::File::create(&wrapper).unwrap_or_else(|error| panic!("create wrapper: {error}"));
    for header in ABI_HEADERS {
        writeln!(wrapper_file, "#include <{header}>")
            .unwrap_or_else(|error| panic!("write wrapper: {error}"));
    }

    let mut builder = bindgen::Builder::default()
        .use_core()
        .ctypes_prefix("core::ffi")
        .header(wrapper.to_string_lossy())
        .layout_tests(false)
        .prepend_enum_name(false)
        .allowlist_type("seL4_Syscall_ID|invocation_label");
    for dir in &include_dirs {
        builder = builder.clang_arg(format!("-I{}", dir.display()));
    }

    let bindings = builder
        .generate()
        .unwrap_or_else(|error| panic!("unable to generate seL4 ABI bindings: {error}"));
    bindings
        .write_to_file(out_dir.join("sel4_abi.rs"))
        .unwrap_or_else(|error| panic!("write seL4 ABI bindings: {error}"));
}
