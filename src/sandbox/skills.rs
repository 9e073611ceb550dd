//! Skill catalog: scans the shared master skill tree for frontmatter-only
//! summaries, and lazily loads a skill's full instructions on activation.

use std::path::PathBuf;

use crate::model::SkillInfo;

pub struct SkillRegistry {
    skills_dir: PathBuf,
}

impl SkillRegistry {
    pub fn new(skills_dir: PathBuf) -> Self {
        Self { skills_dir }
    }

    /// Scan every `SKILL.md` under the master tree and return its
    /// frontmatter-derived catalog entry. Never fails: a skill whose
    /// frontmatter can't be parsed falls back to its directory name.
    pub async fn scan(&self) -> std::io::Result<Vec<SkillInfo>> {
        let mut skills = Vec::new();
        if !self.skills_dir.exists() {
            return Ok(skills);
        }

        let mut entries = tokio::fs::read_dir(&self.skills_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let skill_path = entry.path();
            let skill_md = skill_path.join("SKILL.md");
            let name = entry.file_name().to_string_lossy().into_owned();

            let description = match tokio::fs::read_to_string(&skill_md).await {
                Ok(content) => parse_frontmatter_description(&content).unwrap_or_default(),
                Err(_) => String::new(),
            };

            skills.push(SkillInfo { name, description, path: skill_path });
        }

        skills.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(skills)
    }

    /// Load a skill's full `SKILL.md` body (frontmatter and all) for injection
    /// into the agent's context once it is activated.
    pub async fn full_instructions(&self, skill_name: &str) -> std::io::Result<String> {
        let skill_md = self.skills_dir.join(skill_name).join("SKILL.md");
        tokio::fs::read_to_string(skill_md).await
    }
}

/// Extract the `description:` field from a `---`-delimited YAML frontmatter
/// block at the top of a skill's `SKILL.md`. Returns `None` if there is no
/// well-formed frontmatter block or no `description` field within it.
fn parse_frontmatter_description(content: &str) -> Option<String> {
    let content = content.strip_prefix('\n').unwrap_or(content);
    let mut parts = content.splitn(3, "---");
    let _before = parts.next()?;
    let frontmatter = parts.next()?;

    let yaml: serde_yaml::Value = serde_yaml::from_str(frontmatter).ok()?;
    yaml.get("description")?.as_str().map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_description_from_frontmatter() {
        let content = "---\nname: deploy\ndescription: Deploys the service.\n---\n\nBody text here.";
        assert_eq!(parse_frontmatter_description(content), Some("Deploys the service.".to_string()));
    }

    #[test]
    fn missing_frontmatter_returns_none() {
        assert_eq!(parse_frontmatter_description("just a plain file"), None);
    }
}
