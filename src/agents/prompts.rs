//! Prompt construction for the LLM-backed capabilities.

use crate::workflow::state::{Category, EmailRecord};

/// Email bodies are truncated to this many characters before prompting.
const BODY_PREVIEW_CHARS: usize = 4000;

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

// ── Classification ──────────────────────────────────────────────────

pub fn classify_system_prompt() -> String {
    "You are a customer support specialist for an investment and lending desk. \
     Read the customer's email and assign exactly one category.\n\n\
     Categories:\n\
     - \"maturity_reinvestment\": instructions to reinvest funds on maturity\n\
     - \"maturity_repayment\": instructions to repay funds on maturity\n\
     - \"refix_interest_rate\": a request to fix or change the interest rate on a loan\n\
     - \"floating_interest_rate\": a request to move a loan to a floating interest rate\n\
     - \"change_contact_details\": a request to update contact or account details\n\
     - \"unrelated\": anything that matches none of the above\n\n\
     Also report how many authorised signatories the email says the account requires \
     (1 when it does not say).\n\n\
     Respond with ONLY a JSON object:\n\
     {\"category\": \"...\", \"signatory_count\": 1}\n\n\
     Base the category strictly on the email content. Do not guess."
        .to_string()
}

pub fn classify_user_prompt(body: &str) -> String {
    format!("Email content:\n{}", preview(body))
}

// ── Retrieval queries ───────────────────────────────────────────────

pub fn queries_system_prompt() -> String {
    "You turn customer emails into questions for an internal knowledge base.\n\n\
     Identify what the customer wants and write between one and three short, specific \
     questions whose answers would let support respond. One question is fine when it \
     covers the request. Never write more than three.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"queries\": [\"...\"]}"
        .to_string()
}

pub fn queries_user_prompt(body: &str) -> String {
    format!("Email content:\n{}", preview(body))
}

// ── Knowledge-base answers ──────────────────────────────────────────

pub fn answer_system_prompt() -> String {
    "You answer questions using only the context provided. Do not add outside \
     knowledge or assumptions. If the context does not contain the answer, reply \
     exactly: I don't know.\n\
     Keep the answer short and in plain professional language."
        .to_string()
}

pub fn answer_user_prompt(question: &str, chunks: &[&str]) -> String {
    let mut prompt = format!("Question: {question}\n\nContext:\n");
    for (i, chunk) in chunks.iter().enumerate() {
        prompt.push_str(&format!("[{}] {}\n\n", i + 1, chunk.trim()));
    }
    prompt
}

// ── Drafting ────────────────────────────────────────────────────────

/// Fixed acknowledgement for a category and signatory count.
pub fn response_template(category: Category, signatory_count: u32) -> Option<&'static str> {
    let dual = signatory_count >= 2;
    let text = match (category, dual) {
        (Category::MaturityReinvestment, false) => {
            "Thanks for your email and instructions. We have loaded your investment to reinvest on maturity."
        }
        (Category::MaturityReinvestment, true) => {
            "Thanks for your email and instructions. We note that your account requires two signatories. \
             Please have a second signatory email us to confirm the same reinvestment instruction."
        }
        (Category::MaturityRepayment, false) => {
            "Thanks for your email and instructions. We have loaded your investment to repay on maturity."
        }
        (Category::MaturityRepayment, true) => {
            "Thanks for your email and instructions. We note that your account requires two signatories. \
             Please have a second signatory email us to confirm the same repayment instruction."
        }
        (Category::RefixInterestRate, false) => {
            "Thanks for your email and instructions. We have loaded your instruction to fix the interest rate as requested."
        }
        (Category::RefixInterestRate, true) => {
            "Thanks for your email and instructions. We note that your account requires two signatories. \
             Please have a second signatory email us to confirm the interest rate change."
        }
        (Category::FloatingInterestRate, false) => {
            "Thanks for your email and instructions. We have set your loan to a floating interest rate."
        }
        (Category::FloatingInterestRate, true) => {
            "Thanks for your email and instructions. We note that your account requires two signatories. \
             Please have a second signatory email us to confirm setting your loan to a floating interest rate."
        }
        (Category::ChangeContactDetails, false) => {
            "Thanks for your email. We have updated your contact details as requested."
        }
        (Category::ChangeContactDetails, true) => {
            "Thanks for your email. We note that your account requires two signatories. \
             Please have a second signatory email us to confirm the changes to your contact details."
        }
        (Category::Unrelated, _) => return None,
    };
    Some(text)
}

pub fn draft_system_prompt(signature: &str) -> String {
    format!(
        "You write replies for the customer support team of an investment and lending desk.\n\n\
         Use the category, the matching response template, and the retrieved information to \
         write a short, friendly, professional reply. Keep the template's meaning; you may \
         add details from the retrieved information when they help the customer. If the \
         information is insufficient, politely ask for what is missing.\n\n\
         Format:\n\
         Dear <customer name, or \"Customer\" when unknown>,\n\n\
         <body>\n\n\
         Best regards,\n\
         {signature}\n\n\
         When earlier drafts were rejected, follow the reviewer's feedback.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"email\": \"<the full reply>\"}}"
    )
}

pub fn draft_user_prompt(
    email: &EmailRecord,
    category: Category,
    signatory_count: u32,
    context: &str,
) -> String {
    let mut prompt = String::with_capacity(1024);
    prompt.push_str(&format!("Category: {category}\n"));
    prompt.push_str(&format!("Authorised signatories: {signatory_count}\n"));
    match response_template(category, signatory_count) {
        Some(template) => prompt.push_str(&format!("Response template: {template}\n")),
        None => prompt.push_str("Response template: ask politely for clarification.\n"),
    }
    if !email.sender.is_empty() {
        prompt.push_str(&format!("From: {}\n", email.sender));
    }
    if !email.subject.is_empty() {
        prompt.push_str(&format!("Subject: {}\n", email.subject));
    }
    prompt.push_str(&format!("\nEmail content:\n{}\n", preview(&email.body)));
    if !context.trim().is_empty() {
        prompt.push_str(&format!("\nRetrieved information:\n{context}\n"));
    }
    prompt
}

// ── Proofreading ────────────────────────────────────────────────────

pub fn proofread_system_prompt() -> String {
    "You review reply drafts before they go to customers.\n\n\
     Check the draft against the customer's email for accuracy (does it address the \
     request), tone (polite, professional, on brand), and quality (clear and concise). \
     Only reject a draft when it is missing information or contains irrelevant \
     information that would hurt customer satisfaction or professionalism. When you \
     reject it, give short, actionable feedback for the writer.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"send\": true, \"feedback\": \"...\"}"
        .to_string()
}

pub fn proofread_user_prompt(original_body: &str, draft: &str) -> String {
    format!(
        "Customer email:\n{}\n\nDraft reply:\n{}",
        preview(original_body),
        draft
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_related_category_has_both_templates() {
        for category in Category::ALL {
            let single = response_template(category, 1);
            let dual = response_template(category, 2);
            if category == Category::Unrelated {
                assert!(single.is_none() && dual.is_none());
            } else {
                assert!(single.is_some());
                assert!(dual.unwrap().contains("two signatories"));
            }
        }
    }

    #[test]
    fn zero_signatories_uses_single_template() {
        assert_eq!(
            response_template(Category::MaturityRepayment, 0),
            response_template(Category::MaturityRepayment, 1)
        );
    }

    #[test]
    fn classify_prompt_lists_all_categories() {
        let prompt = classify_system_prompt();
        for category in Category::ALL {
            assert!(prompt.contains(category.as_str()), "missing {category}");
        }
    }

    #[test]
    fn draft_prompt_carries_signature() {
        assert!(draft_system_prompt("The Lending Desk").contains("The Lending Desk"));
    }

    #[test]
    fn draft_user_prompt_includes_context_and_template() {
        let email = EmailRecord {
            sender: "jo@example.com".into(),
            subject: "Maturity".into(),
            body: "Please repay my deposit.".into(),
            ..Default::default()
        };
        let prompt = draft_user_prompt(
            &email,
            Category::MaturityRepayment,
            2,
            "Repayments settle in two days.",
        );
        assert!(prompt.contains("Category: maturity_repayment"));
        assert!(prompt.contains("second signatory"));
        assert!(prompt.contains("Repayments settle in two days."));
        assert!(prompt.contains("jo@example.com"));
    }

    #[test]
    fn answer_prompt_numbers_chunks() {
        let prompt = answer_user_prompt("Fees?", &["No fees.", "Rates vary."]);
        assert!(prompt.contains("[1] No fees."));
        assert!(prompt.contains("[2] Rates vary."));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(BODY_PREVIEW_CHARS + 500);
        let prompt = classify_user_prompt(&body);
        assert!(prompt.len() < BODY_PREVIEW_CHARS + 100);
    }
}
