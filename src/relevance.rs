//! Coarse keyword filter deciding whether a feed item is security news.
//!
//! Matching is a plain case-insensitive substring test over
//! `title + " " + summary`. There is no stemming or tokenisation, so short
//! terms such as `apt` also hit unrelated words.

use crate::models::RawEntry;
use tracing::debug;

/// Built-in security vocabulary, Chinese and English.
pub const SECURITY_KEYWORDS: &[&str] = &[
    // Chinese
    "安全", "漏洞", "攻击", "黑客", "病毒", "恶意软件", "勒索", "渗透",
    "防护", "防御", "加密", "解密", "隐私", "数据泄露", "泄露", "入侵",
    "网络安全", "信息安全", "网络攻击", "网络防护", "网络威胁", "威胁",
    "安全漏洞", "安全事件", "安全威胁", "安全防护", "安全检测", "数据安全",
    "应用安全", "系统安全", "终端安全", "云安全", "移动安全", "木马",
    "钓鱼", "补丁", "零日",
    // English
    "security", "vulnerability", "vulnerabilities", "attack", "hacker",
    "hack", "malware", "ransomware", "penetration", "exploit", "breach",
    "threat", "phishing", "trojan", "backdoor", "privilege", "escalation",
    "injection", "xss", "csrf", "apt", "ddos", "botnet", "zero-day",
    "0day", "cve", "rce", "ssrf", "cybersecurity", "infosec", "netsec",
    "intrusion", "spyware", "data leak", "patch",
];

/// Case-insensitive substring filter over a keyword list.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    keywords: Vec<String>,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        Self::new(SECURITY_KEYWORDS.iter().copied())
    }
}

impl RelevanceFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        keywords.sort();
        keywords.dedup();
        Self { keywords }
    }

    /// Built-in list plus site-specific terms from the configuration.
    pub fn with_extra(extra: &[String]) -> Self {
        Self::new(
            SECURITY_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .chain(extra.iter().cloned()),
        )
    }

    pub fn is_relevant(&self, entry: &RawEntry) -> bool {
        let hit = self.matches(&entry.title, &entry.summary);
        if !hit {
            debug!(title = %entry.title, "Dropping off-topic entry");
        }
        hit
    }

    pub fn matches(&self, title: &str, summary: &str) -> bool {
        let text = format!("{title} {summary}").to_lowercase();
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }
}
