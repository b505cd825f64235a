//! Raw-content roots of managed Git hosting services

use std::fmt;
use std::str::FromStr;

/// Ref used when none is given
pub const DEFAULT_REF: &str = "master";

/// A Git hosting service with a raw-content URL convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    GitHub,
    GitLab,
    Bitbucket,
}

impl GitService {
    /// Domain serving raw content when no override is given
    pub fn default_domain(self) -> &'static str {
        match self {
            GitService::GitHub => "raw.githubusercontent.com",
            GitService::GitLab => "gitlab.com",
            GitService::Bitbucket => "bitbucket.org",
        }
    }

    /// Raw-content root for `user/repo` at `git_ref`
    pub fn url(self, user: &str, repo: &str, git_ref: Option<&str>, domain: Option<&str>) -> String {
        let domain = domain.unwrap_or_else(|| self.default_domain());
        let git_ref = git_ref.unwrap_or(DEFAULT_REF);
        match self {
            GitService::GitHub => format!("https://{}/{}/{}/{}/", domain, user, repo, git_ref),
            GitService::GitLab | GitService::Bitbucket => {
                format!("https://{}/{}/{}/raw/{}/", domain, user, repo, git_ref)
            }
        }
    }
}

impl fmt::Display for GitService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitService::GitHub => write!(f, "github"),
            GitService::GitLab => write!(f, "gitlab"),
            GitService::Bitbucket => write!(f, "bitbucket"),
        }
    }
}

impl FromStr for GitService {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(GitService::GitHub),
            "gitlab" => Ok(GitService::GitLab),
            "bitbucket" => Ok(GitService::Bitbucket),
            other => Err(format!("Unknown Git service: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_url() {
        assert_eq!(
            GitService::GitHub.url("operatorequals", "httpimport", None, None),
            "https://raw.githubusercontent.com/operatorequals/httpimport/master/"
        );
        assert_eq!(
            GitService::GitHub.url("u", "r", Some("v1.0"), Some("raw.example.com")),
            "https://raw.example.com/u/r/v1.0/"
        );
    }

    #[test]
    fn test_gitlab_and_bitbucket_urls() {
        assert_eq!(
            GitService::GitLab.url("u", "r", Some("main"), None),
            "https://gitlab.com/u/r/raw/main/"
        );
        assert_eq!(
            GitService::Bitbucket.url("u", "r", None, None),
            "https://bitbucket.org/u/r/raw/master/"
        );
    }

    #[test]
    fn test_parse_service() {
        assert_eq!("GitHub".parse::<GitService>(), Ok(GitService::GitHub));
        assert_eq!("bitbucket".parse::<GitService>(), Ok(GitService::Bitbucket));
        assert!("sourceforge".parse::<GitService>().is_err());
    }
}
