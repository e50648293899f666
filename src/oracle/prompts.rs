//! Prompt templates. Placeholders are written `{{name}}`.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKey {
    ScoreArticle,
    DedupeArticles,
    RewriteArticle,
    RegenerateArticle,
    FactCheck,
    SummarizeEvent,
    SubjectLine,
}

impl PromptKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKey::ScoreArticle => "score_article",
            PromptKey::DedupeArticles => "dedupe_articles",
            PromptKey::RewriteArticle => "rewrite_article",
            PromptKey::RegenerateArticle => "regenerate_article",
            PromptKey::FactCheck => "fact_check",
            PromptKey::SummarizeEvent => "summarize_event",
            PromptKey::SubjectLine => "subject_line",
        }
    }

    pub fn system(&self) -> &'static str {
        match self {
            PromptKey::ScoreArticle => SCORE_SYSTEM,
            PromptKey::DedupeArticles => DEDUPE_SYSTEM,
            PromptKey::RewriteArticle | PromptKey::RegenerateArticle => REWRITE_SYSTEM,
            PromptKey::FactCheck => FACT_CHECK_SYSTEM,
            PromptKey::SummarizeEvent => SUMMARY_SYSTEM,
            PromptKey::SubjectLine => SUBJECT_SYSTEM,
        }
    }

    fn template(&self) -> &'static str {
        match self {
            PromptKey::ScoreArticle => SCORE_USER,
            PromptKey::DedupeArticles => DEDUPE_USER,
            PromptKey::RewriteArticle => REWRITE_USER,
            PromptKey::RegenerateArticle => REGENERATE_USER,
            PromptKey::FactCheck => FACT_CHECK_USER,
            PromptKey::SummarizeEvent => SUMMARY_USER,
            PromptKey::SubjectLine => SUBJECT_USER,
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            PromptKey::ScoreArticle | PromptKey::FactCheck => 200,
            PromptKey::DedupeArticles => 400,
            PromptKey::RewriteArticle | PromptKey::RegenerateArticle => 900,
            PromptKey::SummarizeEvent => 120,
            PromptKey::SubjectLine => 60,
        }
    }
}

/// One request to the oracle: template key plus filled-in user prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptRequest {
    pub key: PromptKey,
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

impl PromptRequest {
    pub fn build(key: PromptKey, placeholders: &[(&str, &str)]) -> Self {
        Self {
            key,
            system: key.system().to_string(),
            user: render(key.template(), placeholders),
            max_tokens: key.max_tokens(),
        }
    }
}

/// Replace every `{{name}}` with its value. Unknown placeholders are left as-is.
pub fn render(template: &str, placeholders: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in placeholders {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

const SCORE_SYSTEM: &str = "You rate local news for a daily community newsletter. \
Reply with JSON only.";
const SCORE_USER: &str = "Rate this article from 0 to 10 on each criterion.\n\
Return {\"interest\": n, \"local_relevance\": n, \"community_impact\": n}.\n\n\
Title: {{title}}\nSource: {{source}}\n\n{{body}}";

const DEDUPE_SYSTEM: &str = "You group news articles that cover the same real-world story. \
Reply with JSON only.";
const DEDUPE_USER: &str = "Below are numbered articles. Return an array of groups, each group \
an array of the indices that cover the same story. Omit articles that are unique.\n\n{{articles}}";

const REWRITE_SYSTEM: &str = "You write concise, neutral newsletter copy from source articles. \
Never add facts that are not in the source. Reply with JSON only.";
const REWRITE_USER: &str = "Rewrite the article for the newsletter.\n\
Return {\"headline\": \"...\", \"body\": \"...\"} with a body of 2-4 short paragraphs.\n\n\
Title: {{title}}\n\n{{body}}";
const REGENERATE_USER: &str = "A previous rewrite of this article failed a fact-check \
(score {{score}}/30). Rewrite it again, staying strictly within the source facts.\n\
Return {\"headline\": \"...\", \"body\": \"...\"}.\n\nTitle: {{title}}\n\n{{body}}";

const FACT_CHECK_SYSTEM: &str = "You verify newsletter copy against its source. Reply with JSON only.";
const FACT_CHECK_USER: &str = "Score the generated copy from 0 to 10 on each criterion.\n\
Return {\"factual_accuracy\": n, \"context_preservation\": n, \"no_misleading_claims\": n}.\n\n\
SOURCE:\n{{original}}\n\nGENERATED:\n{{headline}}\n{{generated}}";

const SUMMARY_SYSTEM: &str = "You summarize community events in one friendly sentence. \
Output only the sentence.";
const SUMMARY_USER: &str = "Event: {{title}}\n\n{{description}}";

const SUBJECT_SYSTEM: &str = "You write email subject lines for a local newsletter. \
Output one line under 70 characters, no emojis.";
const SUBJECT_USER: &str = "Today's top stories:\n{{headlines}}";
