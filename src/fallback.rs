use rand::Rng;
use tracing::warn;

/// 备选照片池，按性别二分。
///
/// Loaded once at process start and shared read-only across request
/// handlers; never reconstructed per request.
#[derive(Clone, Debug)]
pub struct FallbackPools {
    male: Vec<String>,
    female: Vec<String>,
}

impl FallbackPools {
    pub fn new(male: Vec<String>, female: Vec<String>) -> Self {
        Self { male, female }
    }

    /// Picks a placeholder photo for the given gender signal.
    ///
    /// Any recognized female token (case-insensitive, incl. the localized
    /// `女性` variant) selects the female pool; every other value, including
    /// a missing or empty one, defaults to the male pool. If the matched
    /// pool is empty a path is synthesized from a random index, so the
    /// result is never empty.
    pub fn pick(&self, gender: Option<&str>) -> String {
        let female = gender.map(is_female_token).unwrap_or(false);
        let (pool, side) = if female {
            (&self.female, "female")
        } else {
            (&self.male, "male")
        };

        let mut rng = rand::rng();
        if pool.is_empty() {
            warn!(gender = ?gender, side, "no fallback photos configured, synthesizing path");
            let index = rng.random_range(1..=10);
            return format!("/{side}/{index}.png");
        }
        pool[rng.random_range(0..pool.len())].clone()
    }
}

fn is_female_token(gender: &str) -> bool {
    let trimmed = gender.trim();
    trimmed.eq_ignore_ascii_case("female") || trimmed.contains('女')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pools() -> FallbackPools {
        FallbackPools::new(
            (1..=10).map(|n| format!("/male/{n}.png")).collect(),
            (1..=10).map(|n| format!("/female/{n}.png")).collect(),
        )
    }

    #[test]
    fn female_tokens_draw_from_female_pool() {
        let pools = pools();
        for gender in ["female", "FEMALE", "女性"] {
            let photo = pools.pick(Some(gender));
            assert!(photo.starts_with("/female/"), "{gender} -> {photo}");
        }
    }

    #[test]
    fn everything_else_draws_from_male_pool() {
        let pools = pools();
        for gender in [Some("male"), Some("男性"), Some(""), Some("unknown"), None] {
            let photo = pools.pick(gender);
            assert!(photo.starts_with("/male/"), "{gender:?} -> {photo}");
        }
    }

    #[test]
    fn single_element_pool_is_deterministic() {
        let pools = FallbackPools::new(vec!["/male/only.png".to_string()], Vec::new());
        for _ in 0..20 {
            assert_eq!(pools.pick(Some("male")), "/male/only.png");
        }
    }

    #[test]
    fn empty_pool_synthesizes_a_valid_path() {
        let pools = FallbackPools::new(Vec::new(), Vec::new());
        for _ in 0..20 {
            let photo = pools.pick(Some("男性"));
            let index: u32 = photo
                .strip_prefix("/male/")
                .and_then(|rest| rest.strip_suffix(".png"))
                .and_then(|n| n.parse().ok())
                .unwrap_or_else(|| panic!("unexpected fallback path: {photo}"));
            assert!((1..=10).contains(&index));
        }
    }
}
