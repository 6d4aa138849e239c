//! Template fixes for DSP sources and module test configs
//!
//! Each fix is a small regex patch against the module's `.dsp` file, or a
//! threshold change in its `test_config.json`. Every write is preceded by a
//! numbered backup (`<file>.bak.<n>`) pushed onto a per-module ledger, so
//! `rollback` can restore the original bytes after any number of fixes.

use crate::capabilities::Capabilities;
use crate::layout::ProjectLayout;
use crate::{PipelineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

// ============================================================================
// Catalogue
// ============================================================================

/// Fix catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    ReduceGain,
    AddLimiter,
    AddDcBlocker,
    SmoothGate,
    AdjustThreshold,
}

impl FixType {
    pub const ALL: [FixType; 5] = [
        FixType::ReduceGain,
        FixType::AddLimiter,
        FixType::AddDcBlocker,
        FixType::SmoothGate,
        FixType::AdjustThreshold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FixType::ReduceGain => "reduce_gain",
            FixType::AddLimiter => "add_limiter",
            FixType::AddDcBlocker => "add_dc_blocker",
            FixType::SmoothGate => "smooth_gate",
            FixType::AdjustThreshold => "adjust_threshold",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FixType::ReduceGain => "Reduce output gain to fix clipping",
            FixType::AddLimiter => "Add soft limiter (ma.tanh) before output",
            FixType::AddDcBlocker => "Add DC blocker to remove DC offset",
            FixType::SmoothGate => "Add gate smoothing to reduce clicks",
            FixType::AdjustThreshold => "Modify test_config.json thresholds",
        }
    }

    pub fn target(&self) -> FixTarget {
        match self {
            FixType::AdjustThreshold => FixTarget::Config,
            _ => FixTarget::Dsp,
        }
    }
}

impl fmt::Display for FixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FixType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        FixType::ALL
            .into_iter()
            .find(|fix| fix.as_str() == s)
            .ok_or_else(|| PipelineError::UnknownFix(s.to_string()))
    }
}

/// File a fix edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixTarget {
    Dsp,
    Config,
}

impl FixTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixTarget::Dsp => "dsp",
            FixTarget::Config => "config",
        }
    }
}

/// Catalogue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixTemplate {
    pub name: FixType,

    pub description: String,

    pub target: FixTarget,

    pub auto_fixable: bool,
}

impl From<FixType> for FixTemplate {
    fn from(fix: FixType) -> Self {
        Self {
            name: fix,
            description: fix.description().to_string(),
            target: fix.target(),
            auto_fixable: true,
        }
    }
}

/// Optional fix parameters; all empty means "use defaults"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixParams {
    /// Gain factor for `reduce_gain`, smoothing pole for `smooth_gate`
    pub factor: Option<f64>,

    pub thd_max_percent: Option<f64>,

    pub clipping_max_percent: Option<f64>,

    pub hnr_min_db: Option<f64>,

    pub allow_hot_signal: Option<bool>,
}

impl FixParams {
    fn has_thresholds(&self) -> bool {
        self.thd_max_percent.is_some()
            || self.clipping_max_percent.is_some()
            || self.hnr_min_db.is_some()
            || self.allow_hot_signal.is_some()
    }
}

// ============================================================================
// Patches
// ============================================================================

/// One regex substitution
#[derive(Debug, Clone)]
pub struct PatchTemplate {
    pub pattern: &'static str,

    pub replacement: String,

    /// Replace only the first match
    pub first_only: bool,

    /// True when the text already carries this fix
    pub already_applied: Option<fn(&str) -> bool>,
}

impl PatchTemplate {
    fn new(pattern: &'static str, replacement: String) -> Self {
        Self {
            pattern,
            replacement,
            first_only: false,
            already_applied: None,
        }
    }

    fn first_only(mut self) -> Self {
        self.first_only = true;
        self
    }

    fn unless(mut self, present: fn(&str) -> bool) -> Self {
        self.already_applied = Some(present);
        self
    }
}

/// What a patch would do to a source text
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
    Patched(String),

    AlreadyApplied,

    NotFound,
}

/// `process = ... : *(g);` or `output_gain = g * ...`, as left by `reduce_gain`
static GAIN_STAGE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"process\s*=[^;]*:\s*\*\(\s*\d+\.?\d*\s*\)\s*;|output_gain\s*=\s*\d+\.?\d*\s*\*").ok()
});

fn has_gain_stage(text: &str) -> bool {
    GAIN_STAGE.as_ref().is_some_and(|re| re.is_match(text))
}

fn has_tanh(text: &str) -> bool {
    text.contains("tanh")
}

fn has_dc_blocker(text: &str) -> bool {
    text.contains("dcblocker")
}

fn has_gate_smoothing(text: &str) -> bool {
    text.contains("gate_smooth") || (text.contains("gate") && text.contains("si.smooth"))
}

/// Alternatives for a DSP fix, tried in order; the first that matches wins
pub fn patch_templates(fix: FixType, params: &FixParams) -> Vec<PatchTemplate> {
    match fix {
        FixType::ReduceGain => {
            let factor = params.factor.unwrap_or(0.7);
            vec![
                PatchTemplate::new(r"(process\s*=\s*[^;]+)(;)", format!("${{1}} : *({}){}", factor, "${2}"))
                    .unless(has_gain_stage),
                PatchTemplate::new(r"(output_gain\s*=\s*)(\d+\.?\d*)", format!("${{1}}{} * ${{2}}", factor))
                    .unless(has_gain_stage),
            ]
        }
        FixType::AddLimiter => vec![PatchTemplate::new(
            r"(process\s*=\s*)([^;]+)(;)",
            "${1}${2} : ma.tanh${3}".to_string(),
        )
        .first_only()
        .unless(has_tanh)],
        FixType::AddDcBlocker => vec![PatchTemplate::new(
            r"(process\s*=\s*)([^;]+)(;)",
            "${1}${2} : fi.dcblocker${3}".to_string(),
        )
        .first_only()
        .unless(has_dc_blocker)],
        FixType::SmoothGate => {
            let factor = params.factor.unwrap_or(0.995);
            vec![PatchTemplate::new(
                r"(gate\s*=\s*hslider\s*\([^)]+\))",
                format!("${{1}} : si.smooth({})", factor),
            )
            .unless(has_gate_smoothing)]
        }
        FixType::AdjustThreshold => Vec::new(),
    }
}

/// Apply the first matching template.
///
/// A patch that leaves the text unchanged, or after which its own
/// `already_applied` check still fails, counts as not found.
pub fn apply_patch(content: &str, templates: &[PatchTemplate]) -> Result<PatchOutcome> {
    if templates
        .iter()
        .any(|t| t.already_applied.is_some_and(|present| present(content)))
    {
        return Ok(PatchOutcome::AlreadyApplied);
    }

    for template in templates {
        let re = Regex::new(template.pattern)?;
        if !re.is_match(content) {
            continue;
        }
        let limit = if template.first_only { 1 } else { 0 };
        let patched = re.replacen(content, limit, template.replacement.as_str()).into_owned();

        let verified = template.already_applied.map_or(true, |present| present(&patched));
        if patched != content && verified {
            return Ok(PatchOutcome::Patched(patched));
        }
        log::debug!("Patch {} matched but did not verify", template.pattern);
    }
    Ok(PatchOutcome::NotFound)
}

/// `ChaosFlute` -> `chaos_flute`
pub fn camel_to_snake(name: &str) -> Result<String> {
    let words = Regex::new(r"(.)([A-Z][a-z]+)")?;
    let humps = Regex::new(r"([a-z0-9])([A-Z])")?;
    let s = words.replace_all(name, "${1}_${2}");
    Ok(humps.replace_all(&s, "${1}_${2}").to_lowercase())
}

// ============================================================================
// AutoFixer
// ============================================================================

/// Outcome of one fix attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixResult {
    pub success: bool,

    pub fix_type: String,

    pub module_name: String,

    pub message: String,

    pub file_modified: Option<PathBuf>,

    pub backup_path: Option<PathBuf>,

    /// The fix was already present; nothing was written
    #[serde(default)]
    pub already_applied: bool,

    #[serde(default)]
    pub details: Value,
}

impl FixResult {
    fn failure(fix_type: &str, module: &str, message: String) -> Self {
        Self {
            success: false,
            fix_type: fix_type.to_string(),
            module_name: module.to_string(),
            message,
            file_modified: None,
            backup_path: None,
            already_applied: false,
            details: Value::Null,
        }
    }

    fn applied(fix: FixType, module: &str, message: String, file: &Path, backup: Option<PathBuf>) -> Self {
        Self {
            success: true,
            file_modified: Some(file.to_path_buf()),
            backup_path: backup,
            ..Self::failure(fix.as_str(), module, message)
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into())
    }
}

/// One ledger entry; `backup: None` means the fix created the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub original: PathBuf,

    pub backup: Option<PathBuf>,
}

/// Applies catalogue fixes and keeps a per-module backup ledger
#[derive(Debug)]
pub struct AutoFixer {
    layout: ProjectLayout,

    capabilities: Capabilities,

    ledger: HashMap<String, Vec<BackupEntry>>,
}

impl AutoFixer {
    pub fn new(layout: ProjectLayout) -> Self {
        Self {
            layout,
            capabilities: Capabilities::default(),
            ledger: HashMap::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn available_fixes() -> Vec<FixTemplate> {
        FixType::ALL.into_iter().map(FixTemplate::from).collect()
    }

    /// `<module>.dsp` lowercased, then snake_case, then any `.dsp` file
    pub fn dsp_file(&self, module: &str) -> Option<PathBuf> {
        let dir = self.layout.module_dir(module);
        if !dir.is_dir() {
            return None;
        }

        let mut names = vec![format!("{}.dsp", module.to_lowercase())];
        if let Ok(snake) = camel_to_snake(module) {
            names.push(format!("{}.dsp", snake));
        }
        if let Some(found) = names.iter().map(|n| dir.join(n)).find(|p| p.is_file()) {
            return Some(found);
        }

        let mut any: Vec<PathBuf> = fs::read_dir(&dir)
            .ok()?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "dsp"))
            .collect();
        any.sort();
        any.into_iter().next()
    }

    pub fn config_file(&self, module: &str) -> PathBuf {
        self.layout.config_path(module)
    }

    /// Backups currently held for `module`, oldest first
    pub fn backups(&self, module: &str) -> &[BackupEntry] {
        self.ledger.get(module).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Apply a fix by catalogue name
    pub fn apply_named(&mut self, module: &str, fix: &str, params: &FixParams) -> Result<FixResult> {
        match fix.parse::<FixType>() {
            Ok(fix) => self.apply_fix(module, fix, params),
            Err(_) => Ok(FixResult::failure(fix, module, format!("Unknown fix type: {}", fix))),
        }
    }

    /// Apply a fix, backing up the target first.
    ///
    /// Missing files and unmatched patterns are failed results; only I/O
    /// errors are returned as `Err`.
    pub fn apply_fix(&mut self, module: &str, fix: FixType, params: &FixParams) -> Result<FixResult> {
        let result = match fix.target() {
            FixTarget::Dsp => self.apply_dsp_fix(module, fix, params, true)?,
            FixTarget::Config => self.apply_config_fix(module, params, true)?,
        };
        if result.success {
            log::info!("{}: {}", module, result.message);
        } else {
            log::warn!("{}: {}", module, result.message);
        }
        Ok(result)
    }

    /// Report what `apply_fix` would do without writing
    pub fn dry_run(&mut self, module: &str, fix: FixType, params: &FixParams) -> Result<FixResult> {
        match fix.target() {
            FixTarget::Dsp => self.apply_dsp_fix(module, fix, params, false),
            FixTarget::Config => self.apply_config_fix(module, params, false),
        }
    }

    fn apply_dsp_fix(&mut self, module: &str, fix: FixType, params: &FixParams, write: bool) -> Result<FixResult> {
        if !self.capabilities.dsp_sources {
            return Ok(FixResult::failure(
                fix.as_str(),
                module,
                format!("DSP patching disabled; cannot apply {}", fix),
            ));
        }
        let Some(dsp_file) = self.dsp_file(module) else {
            return Ok(FixResult::failure(
                fix.as_str(),
                module,
                format!("DSP file not found for module: {}", module),
            ));
        };
        let file_name = display_name(&dsp_file);

        let content = fs::read_to_string(&dsp_file)?;
        let patched = match apply_patch(&content, &patch_templates(fix, params))? {
            PatchOutcome::Patched(patched) => patched,
            PatchOutcome::AlreadyApplied => {
                let mut result = FixResult::applied(
                    fix,
                    module,
                    format!("{} already present in {}", fix, file_name),
                    &dsp_file,
                    None,
                );
                result.already_applied = true;
                return Ok(result);
            }
            PatchOutcome::NotFound => {
                return Ok(FixResult::failure(
                    fix.as_str(),
                    module,
                    format!("Could not apply {} fix - pattern not found", fix),
                ));
            }
        };

        if !write {
            let mut result = FixResult::applied(fix, module, format!("Would apply {} to {}", fix, file_name), &dsp_file, None);
            result.details = json!({ "target": "dsp", "description": fix.description(), "patched": patched });
            return Ok(result);
        }

        let backup = self.backup(module, &dsp_file)?;
        fs::write(&dsp_file, patched)?;
        Ok(FixResult::applied(
            fix,
            module,
            format!("Applied {} to {}", fix, file_name),
            &dsp_file,
            Some(backup),
        ))
    }

    fn apply_config_fix(&mut self, module: &str, params: &FixParams, write: bool) -> Result<FixResult> {
        let fix = FixType::AdjustThreshold;
        let config_file = self.config_file(module);

        let mut config = if config_file.is_file() {
            serde_json::from_str::<Value>(&fs::read_to_string(&config_file)?)?
        } else {
            Value::Object(Map::new())
        };
        let root = config
            .as_object_mut()
            .ok_or_else(|| PipelineError::Config(format!("{} is not a JSON object", config_file.display())))?;
        let thresholds = root
            .entry("quality_thresholds")
            .or_insert_with(|| Value::Object(Map::new()));
        if !thresholds.is_object() {
            *thresholds = Value::Object(Map::new());
        }
        adjust_thresholds(thresholds, params);
        let details = json!({ "thresholds": thresholds.clone() });

        if !write {
            let mut result = FixResult::applied(
                fix,
                module,
                format!("Would update thresholds in {}", display_name(&config_file)),
                &config_file,
                None,
            );
            result.details = details;
            return Ok(result);
        }

        let backup = if config_file.is_file() {
            Some(self.backup(module, &config_file)?)
        } else {
            self.ledger.entry(module.to_string()).or_default().push(BackupEntry {
                original: config_file.clone(),
                backup: None,
            });
            None
        };

        if let Some(parent) = config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&config_file, serde_json::to_string_pretty(&config)?)?;

        let mut result = FixResult::applied(
            fix,
            module,
            format!("Updated thresholds in {}", display_name(&config_file)),
            &config_file,
            backup,
        );
        result.details = details;
        Ok(result)
    }

    /// Copy `file` to the next free `<file>.bak.<n>` and push it on the ledger
    fn backup(&mut self, module: &str, file: &Path) -> Result<PathBuf> {
        let entries = self.ledger.entry(module.to_string()).or_default();
        let mut depth = entries.len() + 1;
        let backup = loop {
            let candidate = backup_path(file, depth);
            if !candidate.exists() {
                break candidate;
            }
            depth += 1;
        };

        fs::copy(file, &backup)?;
        log::debug!("Backed up {} -> {}", file.display(), backup.display());
        entries.push(BackupEntry {
            original: file.to_path_buf(),
            backup: Some(backup.clone()),
        });
        Ok(backup)
    }

    /// Undo every recorded fix for `module`, newest first.
    ///
    /// Returns false when there is nothing to roll back, or when a restore
    /// fails; entries not yet restored then stay on the ledger.
    pub fn rollback(&mut self, module: &str) -> bool {
        let Some(mut entries) = self.ledger.remove(module) else {
            return false;
        };
        let restored = entries.len();

        while let Some(entry) = entries.pop() {
            if let Err(e) = restore(&entry) {
                log::error!("{}: rollback of {} failed: {}", module, entry.original.display(), e);
                entries.push(entry);
                self.ledger.insert(module.to_string(), entries);
                return false;
            }
        }

        log::info!("{}: rolled back {} change(s)", module, restored);
        true
    }

    /// Delete backup files without restoring; all modules when `None`
    pub fn clear_backups(&mut self, module: Option<&str>) {
        let modules: Vec<String> = match module {
            Some(m) => vec![m.to_string()],
            None => self.ledger.keys().cloned().collect(),
        };
        for module in modules {
            for entry in self.ledger.remove(&module).unwrap_or_default() {
                if let Some(backup) = entry.backup {
                    if let Err(e) = fs::remove_file(&backup) {
                        log::warn!("Could not remove {}: {}", backup.display(), e);
                    }
                }
            }
        }
    }

    /// Rebuild the ledger for `module` from `*.bak.<n>` files in its
    /// directory, so a later process can roll back
    pub fn recover_ledger(&mut self, module: &str) -> Result<usize> {
        let dir = self.layout.module_dir(module);
        if !dir.is_dir() {
            return Err(PipelineError::ModuleNotFound(module.to_string()));
        }

        let re = Regex::new(r"^(.+)\.bak\.(\d+)$")?;
        let mut found: Vec<(u64, BackupEntry)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(caps) = re.captures(name) else {
                continue;
            };
            let depth = caps[2].parse::<u64>().unwrap_or(0);
            found.push((
                depth,
                BackupEntry {
                    original: dir.join(&caps[1]),
                    backup: Some(path.clone()),
                },
            ));
        }
        found.sort_by_key(|(depth, _)| *depth);

        let entries: Vec<BackupEntry> = found.into_iter().map(|(_, entry)| entry).collect();
        let count = entries.len();
        if count > 0 {
            self.ledger.insert(module.to_string(), entries);
        }
        log::debug!("{}: recovered {} backup(s)", module, count);
        Ok(count)
    }
}

fn adjust_thresholds(thresholds: &mut Value, params: &FixParams) {
    let current = |key: &str, default: f64| thresholds.get(key).and_then(Value::as_f64).unwrap_or(default);

    let mut updates: Vec<(&str, Value)> = Vec::new();
    if params.has_thresholds() {
        if let Some(thd) = params.thd_max_percent {
            updates.push(("thd_max_percent", json!(thd)));
        }
        if let Some(clipping) = params.clipping_max_percent {
            updates.push(("clipping_max_percent", json!(clipping)));
        }
        if let Some(hnr) = params.hnr_min_db {
            updates.push(("hnr_min_db", json!(hnr)));
        }
        if let Some(hot) = params.allow_hot_signal {
            updates.push(("allow_hot_signal", json!(hot)));
        }
    } else {
        updates.push((
            "thd_max_percent",
            json!(f64::max(current("thd_max_percent", 15.0) * 2.0, 30.0)),
        ));
        updates.push((
            "clipping_max_percent",
            json!(f64::max(current("clipping_max_percent", 1.0) * 2.0, 5.0)),
        ));
    }

    if let Some(map) = thresholds.as_object_mut() {
        for (key, value) in updates {
            map.insert(key.to_string(), value);
        }
    }
}

fn restore(entry: &BackupEntry) -> std::io::Result<()> {
    match &entry.backup {
        Some(backup) => {
            fs::copy(backup, &entry.original)?;
            fs::remove_file(backup)
        }
        None if entry.original.exists() => fs::remove_file(&entry.original),
        None => Ok(()),
    }
}

fn backup_path(file: &Path, depth: usize) -> PathBuf {
    let mut name = file.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".bak.{}", depth));
    file.with_file_name(name)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
