//! Scope filters and priority rules for newly published packages.
//!
//! A package is in scope when its name, description, or keywords mention
//! the AI ecosystem, or when it lives in a monitored npm scope. Names that
//! sit within a small edit distance of a popular package are treated as
//! typosquat candidates and jump the queue.

use sigil_entity::job::priority;

/// Terms that put a package in scope. Matched as substrings of the
/// lowercased name, description, and keywords.
pub const AI_KEYWORDS: &[&str] = &[
    // Frameworks
    "langchain",
    "langgraph",
    "crewai",
    "autogen",
    "ag2",
    "llamaindex",
    "llama-index",
    "haystack",
    "semantic-kernel",
    "dspy",
    "instructor",
    "marvin",
    "guidance",
    // Model providers
    "openai",
    "anthropic",
    "cohere",
    "mistral",
    "groq",
    "together",
    "replicate",
    "fireworks",
    "anyscale",
    // Agent protocols
    "mcp",
    "model-context-protocol",
    "modelcontextprotocol",
    "agent",
    "agentic",
    "tool-use",
    "function-calling",
    // Retrieval
    "rag",
    "retrieval",
    "vector",
    "embedding",
    "pinecone",
    "weaviate",
    "chroma",
    "qdrant",
    "milvus",
    "faiss",
    // ML
    "transformers",
    "huggingface",
    "diffusers",
    "tokenizer",
    "torch",
    "tensorflow",
    "jax",
    "mlflow",
    // Skills and plugins
    "skill",
    "plugin",
    "extension",
    "addon",
    "chatgpt-plugin",
    "claude-skill",
    "copilot-extension",
];

/// npm scopes that are always in scope.
pub const MONITORED_NPM_SCOPES: &[&str] = &[
    "@langchain",
    "@modelcontextprotocol",
    "@anthropic",
    "@openai",
    "@llamaindex",
    "@huggingface",
];

/// Names attackers imitate.
pub const POPULAR_TARGETS: &[&str] = &[
    "langchain",
    "openai",
    "anthropic",
    "transformers",
    "huggingface",
    "crewai",
    "autogen",
    "llamaindex",
    "pinecone",
    "chromadb",
    "fastapi",
    "streamlit",
    "numpy",
    "pandas",
    "requests",
    "flask",
    "torch",
    "tensorflow",
    "scikit-learn",
    "boto3",
];

/// Lookalike substitutions: (fake, real).
const CONFUSABLES: &[(&str, &str)] = &[
    ("0", "o"),
    ("1", "l"),
    ("1", "i"),
    ("3", "e"),
    ("5", "s"),
    ("7", "t"),
    ("l", "i"),
    ("rn", "m"),
];

/// Weekly downloads above which an update is scanned at high priority.
pub const POPULAR_WEEKLY_DOWNLOADS: u64 = 1000;

/// Levenshtein edit distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (curr[j] + 1).min(prev[j + 1] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn has_suspicious_substitution(name: &str, target: &str) -> bool {
    let rest: String = name
        .replace(target, "")
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect();
    if rest.is_empty() {
        return false;
    }
    CONFUSABLES.iter().any(|(fake, real)| {
        name.contains(fake) && levenshtein(&name.replace(fake, real), target) <= 1
    })
}

/// Whether `name` looks like an imitation of a popular package.
pub fn is_typosquat_candidate(name: &str) -> bool {
    let normalized = name.to_lowercase().replace('_', "-");
    POPULAR_TARGETS.iter().any(|target| {
        if normalized == *target {
            return false;
        }
        if levenshtein(&normalized, target) <= 2 {
            return true;
        }
        let affixed = normalized.starts_with(&format!("{target}-"))
            || normalized.ends_with(&format!("-{target}"));
        affixed && has_suspicious_substitution(&normalized, target)
    })
}

/// Whether the package metadata mentions the AI ecosystem.
pub fn matches_ai_keywords(name: &str, description: &str, keywords: &[String]) -> bool {
    let searchable = format!("{name} {description} {}", keywords.join(" ")).to_lowercase();
    AI_KEYWORDS.iter().any(|kw| searchable.contains(kw))
}

/// Whether an npm package lives in a monitored scope.
pub fn matches_npm_scope(name: &str) -> bool {
    MONITORED_NPM_SCOPES
        .iter()
        .any(|scope| name.strip_prefix(scope).is_some_and(|rest| rest.starts_with('/')))
}

/// Priority for a newly discovered package.
///
/// `critical` for typosquat candidates; `high` for clawhub skills,
/// monitored npm scopes, and packages with more than
/// [`POPULAR_WEEKLY_DOWNLOADS`] weekly downloads; `normal` otherwise.
pub fn determine_priority(ecosystem: &str, name: &str, weekly_downloads: u64) -> &'static str {
    if is_typosquat_candidate(name) {
        return priority::CRITICAL;
    }
    if ecosystem == "clawhub" {
        return priority::HIGH;
    }
    if ecosystem == "npm" && matches_npm_scope(name) {
        return priority::HIGH;
    }
    if weekly_downloads > POPULAR_WEEKLY_DOWNLOADS {
        return priority::HIGH;
    }
    priority::NORMAL
}
