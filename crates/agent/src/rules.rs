//! Keyword rules evaluated against idle conversations.
//!
//! Rules are matched on the lowercased message, in declaration order, by
//! substring. The first hit wins; the fallback answers everything else.

use serde::{Deserialize, Serialize};

use crate::conversation::ActiveFlow;

/// Signal returned with each reply so the front-end can adapt its widgets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DialogueAction {
    None,
    CallbackRequest,
    OfferConfirmation,
    TechnicianAppointment,
    Done,
}

impl DialogueAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::CallbackRequest => "callbackRequest",
            Self::OfferConfirmation => "offerConfirmation",
            Self::TechnicianAppointment => "technicianAppointment",
            Self::Done => "done",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialogueRule {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub reply: &'static str,
    pub action: DialogueAction,
    pub enters: ActiveFlow,
}

impl DialogueRule {
    pub fn matches(&self, lowercased: &str) -> bool {
        self.keywords.iter().any(|keyword| lowercased.contains(keyword))
    }
}

pub mod replies {
    pub const GREETING: &str = "Bonjour ! Comment puis-je vous aider aujourd'hui ?";
    pub const CALLBACK_PROMPT: &str = "Très bien. Veuillez nous laisser votre numéro (10 chiffres) et un conseiller vous rappellera sous peu.";
    pub const OFFER_PROMPT: &str =
        "Nous avons plusieurs offres disponibles. Souhaitez-vous une assistance personnalisée ?";
    pub const APPOINTMENT_PROMPT: &str = "D’accord. Pour planifier l’intervention, veuillez me donner les informations suivantes séparées par des virgules et dans cet ordre : Votre Nom, la Date (JJ/MM/AAAA), l'Heure (HH:MM), votre Numéro mobile (10 chiffres) et enfin l'Objet de votre demande (Ex: 'Jean Dupont, 29/07/2025, 10:30, 0612345678, Installation Fibre').";
    pub const HELP: &str = "Je suis là pour vous aider. N'hésitez pas à me poser vos questions sur nos services ou à demander un rappel.";
    pub const NOT_UNDERSTOOD: &str = "Désolé, je n'ai pas compris votre demande. Pourriez-vous choisir une option ou reformuler votre question ?";

    pub const CALLBACK_RETRY: &str = "Le numéro doit comporter exactement 10 chiffres (ex : 0612345678). Merci de le saisir à nouveau, ou tapez « annuler ».";
    pub const APPOINTMENT_RETRY: &str = "Je n'ai pas pu lire ces informations. Merci de les envoyer séparées par des virgules : Nom, Date (JJ/MM/AAAA), Heure (HH:MM), Numéro mobile (10 chiffres), Objet (Ex: 'Jean Dupont, 29/07/2025, 10:30, 0612345678, Installation Fibre'), ou tapez « annuler ».";
    pub const OFFER_RETRY: &str =
        "Souhaitez-vous qu'un conseiller vous appelle ? Répondez simplement par oui ou par non.";

    pub const ADVISOR_CALLING: &str = "Un conseiller vous appelle maintenant...";
    pub const ADVISOR_UNREACHABLE: &str = "Désolé, aucun conseiller n'est joignable pour le moment. Vous pouvez demander à être rappelé en écrivant « rappel ».";
    pub const FAREWELL: &str = "Merci pour votre visite. À bientôt !";
    pub const CANCELLED: &str = "C'est noté, j'annule la demande en cours. Comment puis-je vous aider ?";
    pub const SAVE_FAILED: &str = "Désolé, votre demande n'a pas pu être enregistrée. Merci de renvoyer votre message dans un instant.";
}

/// Ordered keyword rules plus the catch-all that always terminates evaluation.
#[derive(Clone, Debug)]
pub struct RuleSet {
    rules: Vec<DialogueRule>,
    fallback: DialogueRule,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            rules: vec![
                DialogueRule {
                    name: "greeting",
                    keywords: &["bonjour", "salut"],
                    reply: replies::GREETING,
                    action: DialogueAction::None,
                    enters: ActiveFlow::None,
                },
                DialogueRule {
                    name: "callback",
                    keywords: &["rappel"],
                    reply: replies::CALLBACK_PROMPT,
                    action: DialogueAction::CallbackRequest,
                    enters: ActiveFlow::CallbackCollection,
                },
                DialogueRule {
                    name: "offer",
                    keywords: &["offre", "souscrire"],
                    reply: replies::OFFER_PROMPT,
                    action: DialogueAction::OfferConfirmation,
                    enters: ActiveFlow::OfferConfirmation,
                },
                DialogueRule {
                    name: "appointment",
                    keywords: &["rendez-vous", "technicien"],
                    reply: replies::APPOINTMENT_PROMPT,
                    action: DialogueAction::TechnicianAppointment,
                    enters: ActiveFlow::AppointmentCollection,
                },
                DialogueRule {
                    name: "help",
                    keywords: &["aide", "question"],
                    reply: replies::HELP,
                    action: DialogueAction::None,
                    enters: ActiveFlow::None,
                },
            ],
            fallback: DialogueRule {
                name: "fallback",
                keywords: &[],
                reply: replies::NOT_UNDERSTOOD,
                action: DialogueAction::None,
                enters: ActiveFlow::None,
            },
        }
    }
}

impl RuleSet {
    /// First keyword rule matching the lowercased message, if any.
    pub fn keyword_match(&self, lowercased: &str) -> Option<&DialogueRule> {
        self.rules.iter().find(|rule| rule.matches(lowercased))
    }

    /// Rule answering the message; the fallback when no keyword matches.
    pub fn evaluate(&self, lowercased: &str) -> &DialogueRule {
        self.keyword_match(lowercased).unwrap_or(&self.fallback)
    }

    pub fn rules(&self) -> &[DialogueRule] {
        &self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::{replies, DialogueAction, RuleSet};
    use crate::conversation::ActiveFlow;

    #[test]
    fn rules_are_evaluated_in_declaration_order() {
        let rules = RuleSet::default();

        // Greeting outranks the callback keyword in the same message.
        let rule = rules.evaluate("bonjour, je voudrais un rappel");
        assert_eq!(rule.name, "greeting");
        assert_eq!(rule.action, DialogueAction::None);

        let rule = rules.evaluate("une offre avec un technicien");
        assert_eq!(rule.name, "offer");
        assert_eq!(rule.enters, ActiveFlow::OfferConfirmation);
    }

    #[test]
    fn keywords_match_inside_words() {
        let rules = RuleSet::default();
        assert_eq!(rules.evaluate("rappelez-moi").name, "callback");
        assert_eq!(rules.evaluate("prendre rendez-vous").name, "appointment");
        assert_eq!(rules.evaluate("j'ai besoin d'aide").name, "help");
    }

    #[test]
    fn unmatched_messages_fall_back() {
        let rules = RuleSet::default();
        assert!(rules.keyword_match("quel temps fait-il").is_none());

        let rule = rules.evaluate("quel temps fait-il");
        assert_eq!(rule.reply, replies::NOT_UNDERSTOOD);
        assert_eq!(rule.enters, ActiveFlow::None);
    }

    #[test]
    fn actions_serialize_with_client_names() {
        let encoded = serde_json::to_string(&[
            DialogueAction::None,
            DialogueAction::CallbackRequest,
            DialogueAction::OfferConfirmation,
            DialogueAction::TechnicianAppointment,
            DialogueAction::Done,
        ])
        .expect("serialize");

        assert_eq!(
            encoded,
            r#"["none","callbackRequest","offerConfirmation","technicianAppointment","done"]"#
        );
        assert_eq!(DialogueAction::TechnicianAppointment.as_str(), "technicianAppointment");
    }
}
