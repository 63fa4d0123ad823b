use crate::llm::{LanguageModel, ReplyFormat};
use crate::nl2sql::intent::extract_json;
use crate::nl2sql::prompts::detection_prompt;
use serde_json::Value;
use tracing::{info, warn};

pub const DEFAULT_THRESHOLD: f64 = 0.6;

/// Heuristic results at or above this confidence skip the model.
const DECISIVE_CONFIDENCE: f64 = 0.85;

const DATA_KEYWORDS: &[&str] = &[
    // English
    "how many", "how much", "total", "sum", "average", "count", "cost", "spend",
    "revenue", "sales", "compare", "versus", "highest", "lowest", "maximum",
    "minimum", "top", "ranking", "sorted", "category", "product", "equipment",
    "month", "year", "quarter", "period", "date", "trend", "history", "show",
    "list", "ticket", "failure", "maintenance", "event", "open", "closed",
    "pending", "resolved", "customer", "technician",
    // Spanish
    "cuanto", "cuantos", "cuánto", "cuántos", "suma", "promedio", "gasto",
    "costo", "ingreso", "venta", "comparar", "comparación", "mayor", "menor",
    "máximo", "mínimo", "ordenar", "ordenados", "categoría", "servicio",
    "producto", "equipo", "mes", "año", "trimestre", "período", "fecha",
    "tendencia", "evolución", "histórico", "muestra", "mostrar", "dame", "lista",
    "listar", "falla", "mantenimiento", "evento", "abierto", "cerrado",
    "pendiente", "resuelto", "cliente", "usuario", "técnico",
];

const CHAT_KEYWORDS: &[&str] = &[
    // English
    "hello", "thanks", "thank you", "bye", "help", "what can you", "how does",
    "explain", "what is", "why", "who are",
    // Spanish
    "hola", "gracias", "adiós", "chao", "ayuda", "qué puedes", "que puedes",
    "cómo funciona", "como funciona", "explicar", "explica", "qué es", "que es",
    "por qué", "por que", "quién", "quien",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub is_data_query: bool,
    pub confidence: f64,
    pub reasoning: String,
}

/// Decides whether a message is a question about the data or conversation.
#[derive(Debug, Clone)]
pub struct QueryDetector {
    threshold: f64,
}

impl Default for QueryDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl QueryDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Whether a detection is confident enough to run a query for.
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.is_data_query && detection.confidence >= self.threshold
    }

    /// Keyword scoring. Never calls out.
    pub fn heuristic(&self, message: &str) -> Detection {
        let lower = message.to_lowercase();
        let data_hits = DATA_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
        let chat_hits = CHAT_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();

        if data_hits == 0 && chat_hits == 0 {
            return Detection {
                is_data_query: false,
                confidence: 0.3,
                reasoning: "No relevant keywords found.".to_string(),
            };
        }

        let ratio = data_hits as f64 / (data_hits + chat_hits) as f64;
        Detection {
            is_data_query: ratio > 0.5,
            confidence: (0.5 + ratio * 0.4).min(0.85),
            reasoning: format!(
                "Heuristic: {} data keywords vs {} chat keywords.",
                data_hits, chat_hits
            ),
        }
    }

    /// Heuristic first; when it is not decisive and a model is available, the
    /// model's classification wins. Model failures fall back to the heuristic.
    pub async fn detect(&self, message: &str, model: Option<&dyn LanguageModel>) -> Detection {
        let heuristic = self.heuristic(message);
        let Some(model) = model else {
            return heuristic;
        };
        if heuristic.confidence >= DECISIVE_CONFIDENCE {
            info!("Heuristic detection: {:?}", heuristic);
            return heuristic;
        }

        let reply = match model.complete(&detection_prompt(message), ReplyFormat::Json).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Model detection failed, using heuristic: {}", e);
                return heuristic;
            }
        };

        match extract_json(&reply).ok().and_then(|v| model_detection(&v)) {
            Some(detection) => {
                info!("Model detection: {:?}", detection);
                detection
            }
            None => {
                warn!("Unusable detection reply, using heuristic: {}", reply);
                heuristic
            }
        }
    }
}

fn model_detection(value: &Value) -> Option<Detection> {
    let obj = value.as_object()?;
    Some(Detection {
        is_data_query: obj.get("requires_data")?.as_bool()?,
        confidence: obj
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(0.5),
        reasoning: obj
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or("Model detection")
            .to_string(),
    })
}
