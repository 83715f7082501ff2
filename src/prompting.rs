use minijinja::{context, Environment};

const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system_prompt.j2");
const MISSING_FIELDS_TEMPLATE: &str = include_str!("prompts/missing_fields.j2");
const LEAD_ENVELOPE_TEMPLATE: &str = include_str!("prompts/lead_envelope.j2");

pub struct SystemPromptContext<'a> {
    pub org_name: &'a str,
    pub bot_name: &'a str,
}

pub fn render_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    let mut env = Environment::new();
    if env
        .add_template("system_prompt", SYSTEM_PROMPT_TEMPLATE)
        .is_err()
    {
        return fallback_system_prompt(ctx);
    }

    let Ok(template) = env.get_template("system_prompt") else {
        return fallback_system_prompt(ctx);
    };

    template
        .render(context! {
            org_name => ctx.org_name,
            bot_name => ctx.bot_name,
        })
        .unwrap_or_else(|_| fallback_system_prompt(ctx))
}

fn fallback_system_prompt(ctx: &SystemPromptContext<'_>) -> String {
    format!(
        "You are {}, a friendly assistant for {}, a charity foundation.\n\
         Share what the foundation does and, over the course of the conversation,\n\
         naturally collect the visitor's name, email, phone number, and areas of\n\
         interest. Never be pushy; respect anyone who declines to share details.\n",
        if ctx.bot_name.trim().is_empty() {
            "the assistant"
        } else {
            ctx.bot_name.trim()
        },
        if ctx.org_name.trim().is_empty() {
            "the foundation"
        } else {
            ctx.org_name.trim()
        }
    )
}

/// Renders the per-turn reminder listing which lead fields are still unseen.
pub fn render_missing_fields_reminder(missing: &[&str]) -> String {
    let mut env = Environment::new();
    if env
        .add_template("missing_fields", MISSING_FIELDS_TEMPLATE)
        .is_err()
    {
        return fallback_missing_fields_reminder(missing);
    }

    let Ok(template) = env.get_template("missing_fields") else {
        return fallback_missing_fields_reminder(missing);
    };

    template
        .render(context! { missing => missing })
        .unwrap_or_else(|_| fallback_missing_fields_reminder(missing))
}

fn fallback_missing_fields_reminder(missing: &[&str]) -> String {
    if missing.is_empty() {
        return "You already have every lead detail you need. Do not ask for more personal information.".to_string();
    }
    format!(
        "Lead details still missing: {}. If it fits the conversation, politely ask for \
         the first one. Ask for at most one detail per reply.",
        missing.join(", ")
    )
}

/// Renders the standing instruction telling the model how to emit captured
/// lead fields.
pub fn render_envelope_instruction() -> String {
    let mut env = Environment::new();
    if env
        .add_template("lead_envelope", LEAD_ENVELOPE_TEMPLATE)
        .is_err()
    {
        return LEAD_ENVELOPE_TEMPLATE.trim().to_string();
    }

    let Ok(template) = env.get_template("lead_envelope") else {
        return LEAD_ENVELOPE_TEMPLATE.trim().to_string();
    };

    template
        .render(context! {})
        .unwrap_or_else(|_| LEAD_ENVELOPE_TEMPLATE.trim().to_string())
}
