//! Windows command-line quoting and executable resolution.
//!
//! `quote_argument` is a straight port of `portable-pty::cmdbuilder`'s
//! `append_quoted` (itself ported from the `ArgvQuote` algorithm used by
//! `CommandLineToArgvW`): double backslashes immediately before a quote or
//! at the end of the argument, and wrap in quotes whenever the argument
//! contains whitespace or a quote.
//!
//! `resolve_executable` adds the Sysnative/System32 WoW64 remapping
//! spec.md §6 calls for; `portable-pty`'s own `search_path` does not do
//! this, so it is authored fresh here, following the surrounding module's
//! style (iterate `PATH`, probe, fall back to `PATHEXT`).

use std::env;
use std::ffi::{OsStr, OsString};
use std::os::windows::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Append `arg`, quoted per Windows command-line conventions, to `cmdline`.
pub fn quote_argument(arg: &OsStr, cmdline: &mut Vec<u16>) {
    let needs_quotes = arg.is_empty()
        || arg.encode_wide().any(|c| {
            c == ' ' as u16 || c == '\t' as u16 || c == '\n' as u16 || c == 0x0b || c == '"' as u16
        });

    if !needs_quotes {
        cmdline.extend(arg.encode_wide());
        return;
    }

    cmdline.push('"' as u16);

    let wide: Vec<u16> = arg.encode_wide().collect();
    let mut i = 0;
    while i < wide.len() {
        let mut backslashes = 0;
        while i < wide.len() && wide[i] == '\\' as u16 {
            i += 1;
            backslashes += 1;
        }

        if i == wide.len() {
            for _ in 0..backslashes * 2 {
                cmdline.push('\\' as u16);
            }
            break;
        } else if wide[i] == b'"' as u16 {
            for _ in 0..backslashes * 2 + 1 {
                cmdline.push('\\' as u16);
            }
            cmdline.push(wide[i]);
        } else {
            for _ in 0..backslashes {
                cmdline.push('\\' as u16);
            }
            cmdline.push(wide[i]);
        }
        i += 1;
    }

    cmdline.push('"' as u16);
}

/// Join `exe` and `args` into a single null-terminated wide command line,
/// per spec.md §6. When `verbatim` is set the tokens are joined with plain
/// spaces and passed through unquoted, matching
/// `SpawnOptions::verbatim_command_line`.
pub fn build_command_line(exe: &OsStr, args: &[OsString], verbatim: bool) -> Vec<u16> {
    let mut cmdline = Vec::new();

    if verbatim {
        let mut first = true;
        for token in std::iter::once(exe).chain(args.iter().map(|a| a.as_os_str())) {
            if !first {
                cmdline.push(' ' as u16);
            }
            first = false;
            cmdline.extend(token.encode_wide());
        }
    } else {
        quote_argument(exe, &mut cmdline);
        for arg in args {
            cmdline.push(' ' as u16);
            quote_argument(arg, &mut cmdline);
        }
    }

    cmdline.push(0);
    cmdline
}

/// Encode `exe` as a nul-terminated wide string, for the `lpApplicationName`
/// style argument some call sites want separately from the full cmdline.
pub fn wide_nul(s: &OsStr) -> Vec<u16> {
    let mut v: Vec<u16> = s.encode_wide().collect();
    v.push(0);
    v
}

/// Remap a `System32`-rooted path to `Sysnative` when the current process
/// is a 32-bit process running under WoW64 on a 64-bit Windows, per
/// spec.md §6: 32-bit processes see `System32` redirected to
/// `SysWOW64`, which hides native 64-bit executables; `Sysnative` is the
/// WoW64 escape hatch back to the real `System32`.
fn remap_sysnative(path: &Path) -> Option<PathBuf> {
    let windir = env::var_os("WINDIR")?;
    let system32 = Path::new(&windir).join("System32");
    let rel = path.strip_prefix(&system32).ok()?;
    Some(Path::new(&windir).join("Sysnative").join(rel))
}

fn is_wow64() -> bool {
    // PROCESSOR_ARCHITEW6432 is only set in the environment block of a
    // 32-bit process running on a 64-bit Windows.
    env::var_os("PROCESSOR_ARCHITEW6432").is_some()
}

/// Try `candidate`, then `candidate` with each of `extensions` appended (for
/// extension-less names), returning the first that exists as a file.
fn probe_candidate(candidate: &Path, extensions: &[OsString]) -> Option<PathBuf> {
    if candidate.is_file() {
        return Some(candidate.to_path_buf());
    }
    if candidate.extension().is_none() {
        for ext in extensions {
            let ext_str = ext.to_string_lossy();
            let ext_str = ext_str.trim_start_matches('.');
            let with_ext = candidate.with_extension(ext_str);
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }
    }
    None
}

/// Resolve `exe` to an absolute path per spec.md §6: absolute paths are
/// remapped/checked in place; relative paths with a directory component are
/// resolved against `cwd`; bare names are searched on `PATH` (and
/// `PATHEXT` for extension-less names), inserting the Sysnative remap of
/// each `System32`-rooted entry immediately before it rather than
/// replacing it, so both the WoW64-redirected and native directories are
/// searched under WoW64.
///
/// Grounded on `portable-pty::cmdbuilder::CommandBuilder::search_path`
/// (Windows half); unlike that routine this one returns an error when
/// nothing is found rather than silently handing the bare name to
/// `CreateProcessW`, since spec.md treats a failed resolution as
/// `SpawnFailed`.
pub fn resolve_executable(exe: &OsStr, cwd: &Path) -> Result<OsString> {
    let exe_path = Path::new(exe);
    let pathext = env::var_os("PATHEXT").unwrap_or_else(|| OsString::from(".COM;.EXE;.BAT;.CMD"));
    let extensions: Vec<OsString> = env::split_paths(&pathext)
        .map(|p| p.into_os_string())
        .collect();

    if exe_path.is_absolute() {
        if is_wow64() {
            if let Some(remapped) = remap_sysnative(exe_path) {
                if remapped.exists() {
                    return Ok(remapped.into_os_string());
                }
            }
        }
        if exe_path.exists() {
            return Ok(exe.to_owned());
        }
        return Err(Error::InvalidArguments(format!(
            "executable {exe_path:?} does not exist"
        )));
    }

    // A relative path with a directory component (e.g. `sub\dir\app.exe`)
    // is resolved against `cwd`, not searched on `PATH`, per spec.md §6.
    let has_dir_component = exe_path
        .parent()
        .is_some_and(|p| !p.as_os_str().is_empty());
    if has_dir_component {
        if let Some(found) = probe_candidate(&cwd.join(exe_path), &extensions) {
            return Ok(found.into_os_string());
        }
        return Err(Error::InvalidArguments(format!(
            "executable {exe_path:?} not found relative to {cwd:?}"
        )));
    }

    let path_var = env::var_os("PATH").unwrap_or_default();
    for dir in env::split_paths(&path_var) {
        if is_wow64() {
            if let Some(remapped) = remap_sysnative(&dir) {
                if let Some(found) = probe_candidate(&remapped.join(exe), &extensions) {
                    return Ok(found.into_os_string());
                }
            }
        }
        if let Some(found) = probe_candidate(&dir.join(exe), &extensions) {
            return Ok(found.into_os_string());
        }
    }

    Err(Error::InvalidArguments(format!(
        "executable {exe:?} not found on PATH"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(s: &str) -> String {
        let mut out = Vec::new();
        quote_argument(OsStr::new(s), &mut out);
        String::from_utf16(&out).unwrap()
    }

    #[test]
    fn leaves_simple_arguments_unquoted() {
        assert_eq!(quote("hello"), "hello");
    }

    #[test]
    fn quotes_arguments_with_spaces() {
        assert_eq!(quote("hello world"), "\"hello world\"");
    }

    #[test]
    fn doubles_backslashes_before_a_trailing_quote() {
        // A single trailing backslash, once wrapped in quotes, must become
        // two backslashes so it doesn't escape the closing quote.
        assert_eq!(quote("a b\\"), "\"a b\\\\\"");
    }

    #[test]
    fn escapes_embedded_quotes() {
        assert_eq!(quote("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn build_command_line_joins_with_single_spaces() {
        let exe = OsStr::new("C:\\Windows\\System32\\cmd.exe");
        let args = vec![OsString::from("/c"), OsString::from("dir /w")];
        let line = build_command_line(exe, &args, false);
        let s = String::from_utf16(&line[..line.len() - 1]).unwrap();
        assert_eq!(s, "C:\\Windows\\System32\\cmd.exe /c \"dir /w\"");
    }

    #[test]
    fn verbatim_join_skips_quoting() {
        let exe = OsStr::new("cmd.exe");
        let args = vec![OsString::from("/c"), OsString::from("dir /w")];
        let line = build_command_line(exe, &args, true);
        let s = String::from_utf16(&line[..line.len() - 1]).unwrap();
        assert_eq!(s, "cmd.exe /c dir /w");
    }
}
