use std::path::Path;

use tracing::info;

use super::UpgradeError;

/// Re-open the mission scripting environment after the game software replaced it.
///
/// If `custom` exists it replaces the scripting file outright. Otherwise the
/// lines that remove `io`, `lfs`, `require` and `package` are commented out.
/// The previous file is kept next to it with a `.bak` extension whenever it
/// is changed. Returns whether the file was changed.
pub fn desanitize(scripting_file: &Path, custom: Option<&Path>) -> Result<bool, UpgradeError> {
    let backup = scripting_file.with_extension("bak");

    if let Some(custom) = custom.filter(|path| path.exists()) {
        info!(file = %scripting_file.display(), "Installing custom mission scripting");
        std::fs::copy(scripting_file, &backup)?;
        std::fs::copy(custom, scripting_file)?;
        return Ok(true);
    }

    let original = std::fs::read_to_string(scripting_file)?;
    let mut dirty = false;
    let lines: Vec<String> = original
        .split_inclusive('\n')
        .map(|line| {
            let patched = patch_line(line);
            if patched != line {
                dirty = true;
            }
            patched
        })
        .collect();

    if dirty {
        info!(file = %scripting_file.display(), "Desanitizing mission scripting");
        std::fs::copy(scripting_file, &backup)?;
        std::fs::write(scripting_file, lines.concat())?;
    }

    Ok(dirty)
}

fn patch_line(line: &str) -> String {
    if line.trim_start().starts_with("--") {
        return line.to_string();
    }
    if line.contains("sanitizeModule('io')") || line.contains("sanitizeModule('lfs')") {
        line.replace("sanitizeModule", "--sanitizeModule")
    } else if line.contains("_G['require'] = nil") || line.contains("_G['package'] = nil") {
        line.replace("_G", "--_G")
    } else if line.contains("require = nil") {
        line.replace("require", "--require")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SANITIZED: &str = "\
local function sanitizeModule(name)
\t_G[name] = nil
end

do
\tsanitizeModule('os')
\tsanitizeModule('io')
\tsanitizeModule('lfs')
\t_G['require'] = nil
\t_G['loadlib'] = nil
\t_G['package'] = nil
end
";

    #[test]
    fn test_comments_out_sanitizers() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("MissionScripting.lua");
        std::fs::write(&file, SANITIZED).unwrap();

        assert!(desanitize(&file, None).unwrap());

        let patched = std::fs::read_to_string(&file).unwrap();
        assert!(patched.contains("\tsanitizeModule('os')"));
        assert!(patched.contains("\t--sanitizeModule('io')"));
        assert!(patched.contains("\t--sanitizeModule('lfs')"));
        assert!(patched.contains("\t--_G['require'] = nil"));
        assert!(patched.contains("\t_G['loadlib'] = nil"));
        assert!(patched.contains("\t--_G['package'] = nil"));

        let backup = std::fs::read_to_string(dir.path().join("MissionScripting.bak")).unwrap();
        assert_eq!(backup, SANITIZED);

        // Already desanitized: nothing to do.
        assert!(!desanitize(&file, None).unwrap());
    }

    #[test]
    fn test_custom_file_replaces() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("MissionScripting.lua");
        let custom = dir.path().join("custom.lua");
        std::fs::write(&file, SANITIZED).unwrap();
        std::fs::write(&custom, "-- custom\n").unwrap();

        assert!(desanitize(&file, Some(&custom)).unwrap());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "-- custom\n");
        assert!(dir.path().join("MissionScripting.bak").exists());
    }

    #[test]
    fn test_plain_require_assignment() {
        assert_eq!(patch_line("  require = nil\n"), "  --require = nil\n");
        assert_eq!(patch_line("-- require = nil\n"), "-- require = nil\n");
    }
}
