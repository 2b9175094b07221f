#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const RELEASE: &str = "6.1.0-test";

/// A shell stand-in for `make` that understands the targets a package run
/// uses. Every call is appended to `<build>/.make-calls`.
const FAKE_MAKE: &str = r#"#!/bin/sh
src=.
build=
arch=
modpath=
prev=
for word in "$@"; do
    if [ "$prev" = "-C" ]; then src=$word; fi
    case "$word" in
        O=*) build=${word#O=} ;;
        ARCH=*) arch=${word#ARCH=} ;;
        INSTALL_MOD_PATH=*) modpath=${word#INSTALL_MOD_PATH=} ;;
    esac
    prev=$word
done
if [ -z "$build" ]; then build=$src; fi
mkdir -p "$build"
echo "CROSS_COMPILE=$CROSS_COMPILE $*" >> "$build/.make-calls"
for word in "$@"; do
    case "$word" in
        defconfig)
            echo "CONFIG_TEST=y" > "$build/.config" ;;
        modules)
            echo "  CC      kernel/fork.o"
            mkdir -p "$build/arch/$arch/boot"
            echo image > "$build/arch/$arch/boot/Image" ;;
        kernelrelease)
            echo "6.1.0-test" ;;
        modules_install)
            echo "  INSTALL drivers/foo.ko"
            mkdir -p "$modpath/lib/modules/6.1.0-test/kernel"
            echo ko > "$modpath/lib/modules/6.1.0-test/kernel/foo.ko" ;;
    esac
done
"#;

pub fn write_fake_make(dir: &Path) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join("fake-make");
    fs::write(&path, FAKE_MAKE).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Command lines the fake make saw for `build`, oldest first.
pub fn make_calls(build: &Path) -> Vec<String> {
    fs::read_to_string(build.join(".make-calls"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
