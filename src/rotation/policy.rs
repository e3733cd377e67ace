//! Rotation policy: triggers, naming and retention
//!
//! A [`RotationPolicy`] is validated once at construction and never changes
//! afterwards. Everything the controller and the maintenance worker need to
//! know about file names is derived from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Timelike, Utc};

use crate::error::RotateError;

/// Extension appended to compressed archives
pub const ARCHIVE_EXTENSION: &str = "gz";

/// Timestamp inserted into the base name when no pattern is configured
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M";

/// Age/count limits applied by retention sweeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Retention {
    /// Archives younger than this are always kept (zero = no age limit)
    pub max_age: Duration,
    /// Number of old archives to keep (0 = no count limit)
    pub max_count: usize,
}

impl Retention {
    /// Neither an age nor a count limit is set
    pub fn is_unlimited(&self) -> bool {
        self.max_age.is_zero() && self.max_count == 0
    }
}

/// Immutable rotation configuration for one log file
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    base_path: PathBuf,
    name_pattern: String,
    rotation_interval: Option<Duration>,
    max_size_bytes: Option<u64>,
    retention: Retention,
    compress: bool,
    buffer_capacity: usize,
}

impl RotationPolicy {
    /// Start building a policy for the given alias path
    pub fn builder(base_path: impl Into<PathBuf>) -> RotationPolicyBuilder {
        RotationPolicyBuilder::new(base_path)
    }

    /// Path of the stable alias
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// strftime template for rotated file names
    pub fn name_pattern(&self) -> &str {
        &self.name_pattern
    }

    pub fn rotation_interval(&self) -> Option<Duration> {
        self.rotation_interval
    }

    pub fn max_size_bytes(&self) -> Option<u64> {
        self.max_size_bytes
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    pub fn compress(&self) -> bool {
        self.compress
    }

    /// Write buffer size in bytes (0 = write-through)
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    /// Start of the rotation period containing `now`
    ///
    /// Periods are multiples of the interval in `now`'s own UTC offset, so a
    /// daily interval starts at local midnight. Without an interval the
    /// period is `now` truncated to whole seconds.
    pub fn period_start(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        let Some(interval) = self.rotation_interval else {
            return now.with_nanosecond(0).unwrap_or(now);
        };
        let secs = interval.as_secs().max(1) as i64;
        let offset = i64::from(now.offset().local_minus_utc());
        let local = now.timestamp() + offset;
        let start = local - local.rem_euclid(secs) - offset;
        DateTime::from_timestamp(start, 0)
            .map(|utc| utc.with_timezone(now.offset()))
            .unwrap_or(now)
    }

    /// Rotated file name for a period start
    pub fn file_name_at(&self, at: DateTime<FixedOffset>) -> PathBuf {
        PathBuf::from(at.format(&self.name_pattern).to_string())
    }

    /// Glob matching every rotated (uncompressed) file
    pub fn rotated_glob(&self) -> String {
        pattern_to_glob(&self.name_pattern)
    }

    /// Glob matching the files retention sweeps operate on
    ///
    /// With compression on this is the archive glob; otherwise the plain
    /// rotated files are swept directly.
    pub fn sweep_glob(&self) -> String {
        let glob = self.rotated_glob();
        if self.compress {
            format!("{}.{}", glob, ARCHIVE_EXTENSION)
        } else {
            glob
        }
    }
}

/// Builder for [`RotationPolicy`]
#[derive(Debug, Clone)]
pub struct RotationPolicyBuilder {
    base_path: PathBuf,
    name_pattern: Option<String>,
    rotation_interval: Option<Duration>,
    max_size_bytes: Option<u64>,
    retention: Retention,
    compress: bool,
    buffer_capacity: usize,
}

impl RotationPolicyBuilder {
    fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            name_pattern: None,
            rotation_interval: None,
            max_size_bytes: None,
            retention: Retention::default(),
            compress: false,
            buffer_capacity: 0,
        }
    }

    /// Override the derived file name pattern
    pub fn name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    /// Rotate at every multiple of `interval` (zero disables)
    pub fn rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    /// Rotate before a write would push the file past `bytes` (zero disables)
    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = Some(bytes).filter(|b| *b > 0);
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.retention.max_age = max_age;
        self
    }

    pub fn max_count(mut self, max_count: usize) -> Self {
        self.retention.max_count = max_count;
        self
    }

    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn buffer_capacity(mut self, bytes: usize) -> Self {
        self.buffer_capacity = bytes;
        self
    }

    /// Validate and freeze the policy
    pub fn build(self) -> Result<RotationPolicy, RotateError> {
        if self.base_path.as_os_str().is_empty() {
            return Err(RotateError::Config("base path is empty".to_string()));
        }
        if self.rotation_interval.is_none() && self.max_size_bytes.is_none() {
            return Err(RotateError::Config(
                "no rotation trigger: set a rotation interval and/or a max size".to_string(),
            ));
        }
        if let Some(interval) = self.rotation_interval {
            if interval < Duration::from_secs(1) {
                return Err(RotateError::Config(format!(
                    "rotation interval must be at least one second, got {:?}",
                    interval
                )));
            }
        }

        let name_pattern = self
            .name_pattern
            .unwrap_or_else(|| default_name_pattern(&self.base_path));
        if StrftimeItems::new(&name_pattern).any(|item| matches!(item, Item::Error)) {
            return Err(RotateError::Config(format!(
                "invalid name pattern: {}",
                name_pattern
            )));
        }

        let policy = RotationPolicy {
            base_path: self.base_path,
            name_pattern,
            rotation_interval: self.rotation_interval,
            max_size_bytes: self.max_size_bytes,
            retention: self.retention,
            compress: self.compress,
            buffer_capacity: self.buffer_capacity,
        };

        let sample = policy.file_name_at(DateTime::<Utc>::UNIX_EPOCH.fixed_offset());
        if sample == policy.base_path {
            return Err(RotateError::Config(format!(
                "name pattern {} collides with the alias path",
                policy.name_pattern
            )));
        }

        Ok(policy)
    }
}

/// Derive `dir/app.%Y%m%d%H%M.log` from `dir/app.log`
pub fn default_name_pattern(base_path: &Path) -> String {
    let escape = |s: &str| s.replace('%', "%%");
    let file_name = match (base_path.file_stem(), base_path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{}.{}.{}",
            escape(&stem.to_string_lossy()),
            DEFAULT_TIMESTAMP_FORMAT,
            escape(&ext.to_string_lossy())
        ),
        _ => format!(
            "{}.{}",
            escape(&base_path.to_string_lossy()),
            DEFAULT_TIMESTAMP_FORMAT
        ),
    };

    match base_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && base_path.extension().is_some() => {
            format!("{}/{}", escape(&parent.to_string_lossy()), file_name)
        }
        _ => file_name,
    }
}

/// Highest collision sequence number; names stay three digits wide so they
/// sort in rotation order
pub const MAX_SEQUENCE: u32 = 999;

/// Insert a collision sequence number before the file extension
///
/// `app.202401011200.log` becomes `app.202401011200_001.log`, which still
/// sorts after the unsuffixed name and before the next period. Only
/// sequences up to [`MAX_SEQUENCE`] keep that order.
pub fn with_sequence(path: &Path, seq: u32) -> PathBuf {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return path.to_path_buf();
    };
    let renamed = match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{}_{:03}{}", &name[..dot], seq, &name[dot..]),
        _ => format!("{}_{:03}", name, seq),
    };
    path.with_file_name(renamed)
}

/// Turn a strftime pattern into a glob
///
/// Every conversion specifier becomes `*`, runs of wildcards collapse into
/// one, and literal glob metacharacters are escaped.
pub fn pattern_to_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();

    let push_wildcard = |glob: &mut String| {
        if !glob.ends_with('*') || glob.ends_with("[*]") {
            glob.push('*');
        }
    };

    while let Some(c) = chars.next() {
        match c {
            '%' => match chars.peek().copied() {
                Some('%') => {
                    chars.next();
                    glob.push('%');
                }
                Some(_) => {
                    // Padding flags, `%.3f`, `%:z` and friends
                    while let Some(&flag) = chars.peek() {
                        if matches!(flag, '-' | '_' | '0' | '#' | ':' | '.')
                            || flag.is_ascii_digit()
                        {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    chars.next();
                    push_wildcard(&mut glob);
                }
                None => glob.push('%'),
            },
            '*' | '?' | '[' | ']' => {
                glob.push('[');
                glob.push(c);
                glob.push(']');
            }
            _ => glob.push(c),
        }
    }

    glob
}
