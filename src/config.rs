use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CARTOON_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/image-generation/generation";
const DEFAULT_TASKS_ENDPOINT: &str = "https://dashscope.aliyuncs.com/api/v1/tasks";
const DEFAULT_MODEL: &str = "wanx-style-repaint-v1";
const DEFAULT_STYLE_INDEX: i32 = 3;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_POLL_BUDGET_MS: u64 = 60_000;
const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 600;

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_opt(name)
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// 人物动漫化API配置。
#[derive(Clone, Debug)]
pub struct CartoonApiConfig {
    pub endpoint: String,
    pub tasks_endpoint: String,
    pub api_key: String,
    pub model: String,
    pub style_index: i32,
    /// Fixed wait between task polls.
    pub poll_interval: Duration,
    /// Wall-clock ceiling for the whole poll loop; the attempt budget is
    /// derived from this and the interval.
    pub poll_budget: Duration,
}

impl CartoonApiConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env_opt("CARTOON_API_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_CARTOON_ENDPOINT.to_string()),
            tasks_endpoint: env_opt("CARTOON_TASKS_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_TASKS_ENDPOINT.to_string()),
            api_key: env_opt("CARTOON_API_KEY").unwrap_or_default(),
            model: env_opt("CARTOON_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            style_index: env_parsed("CARTOON_STYLE_INDEX", DEFAULT_STYLE_INDEX),
            poll_interval: Duration::from_millis(env_parsed(
                "CARTOON_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL_MS,
            )),
            poll_budget: Duration::from_millis(env_parsed(
                "CARTOON_POLL_BUDGET_MS",
                DEFAULT_POLL_BUDGET_MS,
            )),
        }
    }
}

/// Cloudflare R2 (S3兼容) 对象存储配置。
#[derive(Clone, Debug)]
pub struct R2Config {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub presign_expiry: Duration,
}

impl R2Config {
    /// Returns `None` unless every required credential field is present;
    /// the pipeline then runs with local storage only.
    pub fn from_env() -> Option<Self> {
        let access_key_id = env_opt("R2_ACCESS_KEY_ID")?;
        let access_key_secret = env_opt("R2_ACCESS_KEY_SECRET")?;
        let bucket = env_opt("R2_BUCKET")?;
        let endpoint = env_opt("R2_ENDPOINT")?;
        Some(Self {
            access_key_id,
            access_key_secret,
            bucket,
            endpoint,
            region: env_opt("R2_REGION").unwrap_or_else(|| "auto".to_string()),
            presign_expiry: Duration::from_secs(env_parsed(
                "R2_PRESIGN_EXPIRY_SECS",
                DEFAULT_PRESIGN_EXPIRY_SECS,
            )),
        })
    }
}

pub fn default_presign_expiry() -> Duration {
    Duration::from_secs(DEFAULT_PRESIGN_EXPIRY_SECS)
}

/// 本地上传目录配置。
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub base_url: String,
}

impl UploadConfig {
    pub fn from_env(bind_address: &str) -> Self {
        let dir = env_opt("UPLOAD_DIR").map(PathBuf::from).unwrap_or_else(|| {
            let mut base = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
            base.push("photo-cartoonizer");
            base.push("upload");
            base
        });
        let base_url = env_opt("UPLOAD_BASE_URL")
            .unwrap_or_else(|| format!("http://{}/upload", bind_address));
        Self { dir, base_url }
    }
}

/// 备选明星照片池配置，进程启动时加载一次。
#[derive(Clone, Debug)]
pub struct FallbackConfig {
    pub male_photos: Vec<String>,
    pub female_photos: Vec<String>,
}

impl FallbackConfig {
    pub fn from_env() -> Self {
        Self {
            male_photos: photo_list("FALLBACK_MALE_PHOTOS", "male"),
            female_photos: photo_list("FALLBACK_FEMALE_PHOTOS", "female"),
        }
    }
}

fn photo_list(var: &str, side: &str) -> Vec<String> {
    match env_opt(var) {
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect(),
        None => (1..=10).map(|n| format!("/{side}/{n}.png")).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_photo_list_covers_ten_entries() {
        let photos = photo_list("FALLBACK_PHOTOS_UNSET_FOR_TEST", "male");
        assert_eq!(photos.len(), 10);
        assert_eq!(photos[0], "/male/1.png");
        assert_eq!(photos[9], "/male/10.png");
    }
}
