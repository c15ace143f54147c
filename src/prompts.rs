// Prompt text sent to the model, plus the defaults seeded for new users.

use crate::models::PromptType;

pub const SUMMARY_PROMPT: &str = "\
Provide a concise summary (150-200 words) of this coaching session including:
- Main topics discussed
- Key insights and breakthroughs
- Client's current challenges
- Progress made";

pub const FOLLOWUP_EMAIL_PROMPT: &str = "\
Generate a professional follow-up email for the client including:
- Warm appreciation for their time and engagement
- 2-3 key takeaways from today's session
- Specific action items with clear next steps
- Encouragement and support for their journey
- Closing with next session reminder if applicable

Keep the tone warm, professional, and supportive.";

pub const RESOURCE_DISCOVERY_PROMPT: &str = "\
Based on this session, suggest 0-3 highly relevant resources.
Only suggest resources if they directly address topics discussed.
For each resource provide:
- Title
- Type (article/framework/tool/book/video)
- URL (if publicly available) or where to find it
- One-sentence description of why it's relevant
- 2-3 relevant tags from our predefined list

Return as JSON array. Return empty array if no relevant resources found.
Format: [{\"title\": \"...\", \"type\": \"...\", \"url\": \"...\", \"description\": \"...\", \"tags\": [\"tag1\", \"tag2\"]}]";

pub const SESSION_TAGS_PROMPT: &str = "\
Based on this coaching session transcript and analysis, select the most relevant tags.
Choose 3-5 tags from this predefined list that best capture the session's themes:

Available tags: leadership, strategy, team management, career, goals, planning,
communication, presence, confidence, decision making, analysis, conflict,
relationships, development, delegation, performance, promotion, feedback,
work-life-balance, stress-management, mindset, vision, change-management

Return only the tag names that apply, as a comma-separated list.
Example: leadership, team management, delegation, feedback";

/// Used when a user has neither a preparation prompt nor a preparation template.
pub const FALLBACK_PREPARATION_PROMPT: &str = "Based on the client's history and upcoming session, \
provide preparation insights including key themes from recent sessions, open action items, \
and suggested areas to explore.";

pub const NO_PREVIOUS_SESSIONS: &str =
    "No previous sessions found. This appears to be the first session with this client.";

pub const SESSION_TAGS: &[&str] = &[
    "leadership",
    "strategy",
    "team management",
    "career",
    "goals",
    "planning",
    "communication",
    "presence",
    "confidence",
    "decision making",
    "analysis",
    "conflict",
    "relationships",
    "development",
    "delegation",
    "performance",
    "promotion",
    "feedback",
    "work-life-balance",
    "stress-management",
    "mindset",
    "vision",
    "change-management",
];

pub const RESOURCE_TAGS: &[&str] = &[
    "leadership",
    "framework",
    "executive",
    "emotional-intelligence",
    "assessment",
    "development",
    "strategy",
    "decision-making",
    "communication",
    "feedback",
    "goals",
    "planning",
    "teams",
    "organizational",
    "article",
    "tool",
    "book",
    "video",
    "template",
    "worksheet",
    "guide",
    "pdf",
];

pub struct DefaultTemplate {
    pub name: &'static str,
    pub template_type: PromptType,
    pub content: &'static str,
}

pub const DEFAULT_TEMPLATES: &[DefaultTemplate] = &[
    DefaultTemplate {
        name: "Standard Analysis",
        template_type: PromptType::Analysis,
        content: "\
Analyze this coaching session transcript and provide:

1. **Session Summary**: A concise overview of the key topics discussed
2. **Key Insights**: The most important takeaways and breakthroughs
3. **Action Items**: Specific next steps for the client
4. **Progress Notes**: How this session builds on previous work
5. **Areas for Future Exploration**: Topics to revisit in upcoming sessions

Transcript: {transcript}",
    },
    DefaultTemplate {
        name: "Session Preparation",
        template_type: PromptType::Preparation,
        content: "\
Based on the client's history and previous sessions, prepare talking points for the upcoming session:

1. **Client Context**: Current situation and recent developments
2. **Previous Commitments**: Action items from last session
3. **Suggested Focus Areas**: Based on patterns and client goals
4. **Powerful Questions**: 3-5 coaching questions to explore
5. **Resources to Consider**: Relevant frameworks or tools

Client History: {clientHistory}
Previous Sessions: {previousSessions}",
    },
    DefaultTemplate {
        name: "Quick Summary",
        template_type: PromptType::Analysis,
        content: "\
Provide a brief summary of this coaching session:

- Main topic discussed
- Key decision or insight
- Next steps agreed upon

Keep it concise (under 200 words).

Transcript: {transcript}",
    },
    DefaultTemplate {
        name: "Follow-Up Email",
        template_type: PromptType::Analysis,
        content: "\
Draft a follow-up email to the client based on this session:

Subject: [Session Date] - Coaching Session Follow-Up

Include:
- Appreciation for their time and openness
- Key takeaways from our discussion
- Action items with suggested timelines
- Resources or exercises to explore
- Encouragement and support
- Next session scheduling

Keep the tone warm, professional, and encouraging.

Transcript: {transcript}",
    },
];

fn first_template(template_type: PromptType) -> &'static str {
    DEFAULT_TEMPLATES
        .iter()
        .find(|t| t.template_type == template_type)
        .map(|t| t.content)
        .unwrap_or_default()
}

pub fn default_analysis_prompt() -> &'static str {
    first_template(PromptType::Analysis)
}

pub fn default_preparation_prompt() -> &'static str {
    first_template(PromptType::Preparation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts_come_from_named_templates() {
        assert!(default_analysis_prompt().starts_with("Analyze this coaching session"));
        assert!(default_preparation_prompt().contains("Powerful Questions"));
    }

    #[test]
    fn test_tag_lists_have_no_duplicates() {
        for list in [SESSION_TAGS, RESOURCE_TAGS] {
            let mut names: Vec<&str> = list.to_vec();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), list.len());
        }
    }
}
