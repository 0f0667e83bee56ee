// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Derive monitor cfg flags from the seL4 kernel configuration.
// Author: Lukas Bower
//! Build script that reads the seL4 kernel configuration for bare-metal builds.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_CANDIDATES: &[&str] = &[
    ".config",
    "kernel/.config",
    "KernelConfig",
    "kernel/KernelConfig",
    "kernel/gen_config/KernelConfig",
    "kernel/gen_config/kernel/gen_config.h",
    "kernel/gen_config/KernelConfigGenerated.cmake",
    "kernel/gen_config/kernel_all.cmake",
];

fn main() {
    println!("cargo:rerun-if-env-changed=SEL4_BUILD_DIR");
    println!("cargo:rerun-if-env-changed=SEL4_BUILD");
    println!("cargo:rustc-check-cfg=cfg(sel4_config_debug_build)");
    println!("cargo:rustc-check-cfg=cfg(sel4_config_printing)");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "none" {
        return;
    }

    let build_dir = env::var("SEL4_BUILD_DIR")
        .or_else(|_| env::var("SEL4_BUILD"))
        .unwrap_or_else(|_| {
            panic!(
                "The monitor build requires the SEL4_BUILD_DIR (or SEL4_BUILD) environment variable to \n\
                 point at a configured seL4 build directory."
            );
        });
    let build_path = PathBuf::from(&build_dir);
    if !build_path.is_dir() {
        panic!(
            "The provided seL4 build directory does not exist or is not a directory: {}",
            build_path.display()
        );
    }

    emit_config_flags(&build_path);
}

fn emit_config_flags(build_dir: &Path) {
    let sources = load_config_files(build_dir);
    if sources.is_empty() {
        println!(
            "cargo:warning=No seL4 configuration found under {}; assuming a release kernel",
            build_dir.display()
        );
        return;
    }

    if probe_config_flag(&sources, "CONFIG_KERNEL_MCS") != Some(true) {
        panic!("the monitor requires an MCS kernel (CONFIG_KERNEL_MCS)");
    }
    if probe_config_flag(&sources, "CONFIG_DEBUG_BUILD") == Some(true) {
        println!("cargo:rustc-cfg=sel4_config_debug_build");
    }
    if probe_config_flag(&sources, "CONFIG_PRINTING") == Some(true) {
        println!("cargo:rustc-cfg=sel4_config_printing");
    }

    check_feature(
        &sources,
        "CONFIG_ARM_HYPERVISOR_SUPPORT",
        "hypervisor",
        env::var_os("CARGO_FEATURE_HYPERVISOR").is_some(),
    );
    check_feature(
        &sources,
        "CONFIG_HAVE_CHERI",
        "cheri",
        env::var_os("CARGO_FEATURE_CHERI").is_some(),
    );
}

fn check_feature(sources: &[(PathBuf, String)], flag: &str, feature: &str, enabled: bool) {
    let configured = probe_config_flag(sources, flag).unwrap_or(false);
    if configured != enabled {
        println!(
            "cargo:warning={flag} is {} but the `{feature}` feature is {}",
            if configured { "set" } else { "not set" },
            if enabled { "enabled" } else { "disabled" },
        );
    }
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
        .find_map(|(_path, contents)| parse_config_flag(contents, flag))
}

fn parse_config_flag(contents: &str, flag: &str) -> Option<bool> {
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(value) = parse_comment_line(line, flag) {
            return Some(value);
        }
        if let Some(value) = parse_define_line(line, flag) {
            return Some(value);
        }
        if let Some(value) = parse_assignment_line(line, flag) {
            return Some(value);
        }
        if let Some(value) = parse_cmake_line(line, flag) {
            return Some(value);
        }
    }
    None
}

fn parse_comment_line(line: &str, flag: &str) -> Option<bool> {
    if !line.starts_with('#') || line.starts_with("#define") {
        return None;
    }
    let mut words = line.trim_start_matches('#').split_whitespace();
    if words.next() == Some(flag) && line.ends_with("is not set") {
        return Some(false);
    }
    None
}

fn parse_define_line(line: &str, flag: &str) -> Option<bool> {
    let mut parts = line.strip_prefix("#define ")?.split_whitespace();
    if parts.next()? != flag {
        return None;
    }
    parse_bool_token(parts.next().unwrap_or("1"))
}

fn parse_assignment_line(line: &str, flag: &str) -> Option<bool> {
    let (key, value) = line.split_once('=')?;
    if key.trim() != flag {
        return None;
    }
    parse_bool_token(value.trim())
}

fn parse_cmake_line(line: &str, flag: &str) -> Option<bool> {
    let line = line.strip_prefix("set(")?.trim_end_matches(')');
    let mut parts = line.split_whitespace();
    if parts.next()? != flag {
        return None;
    }
    parse_bool_token(parts.next()?)
}

fn parse_bool_token(token: &str) -> Option<bool> {
    match token.trim_matches(&['"', '\''][..]) {
        "y" | "Y" | "1" | "ON" | "TRUE" | "YES" => Some(true),
        "n" | "N" | "0" | "OFF" | "FALSE" | "NO" => Some(false),
        _ => None,
    }
}
