//! Model-facing descriptions and input schemas for the known tools.

use fundwise_core::KnownTool;

pub fn description(tool: KnownTool) -> &'static str {
    match tool {
        KnownTool::LookupSecurity => {
            "Look up a security by ISIN or ticker. Returns name, asset class, currency, \
             issuer and fund holdings where applicable."
        }
        KnownTool::SearchDocuments => {
            "Search the fund document library (prospectuses, KIIDs, annual reports, \
             policies). Returns matching passages with citations."
        }
        KnownTool::MarketData => {
            "Fetch market data for a security: latest price or NAV, and optionally a \
             price history over a period."
        }
        KnownTool::ReviewDocument => {
            "Review an uploaded or stored fund document against a checklist and produce \
             findings. May also return a revised copy of the document for the user."
        }
    }
}

pub fn schema(tool: KnownTool) -> serde_json::Value {
    match tool {
        KnownTool::LookupSecurity => serde_json::json!({
            "type": "object",
            "properties": {
                "isin": {
                    "type": "string",
                    "description": "12-character ISIN, e.g. SE0000108656"
                },
                "ticker": {
                    "type": "string",
                    "description": "Exchange ticker, used when no ISIN is known"
                }
            }
        }),
        KnownTool::SearchDocuments => serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for"
                },
                "document_type": {
                    "type": "string",
                    "enum": ["prospectus", "kiid", "annual_report", "policy", "any"],
                    "default": "any"
                },
                "top_k": {
                    "type": "integer",
                    "description": "Maximum passages to return (default 5)",
                    "default": 5
                }
            },
            "required": ["query"]
        }),
        KnownTool::MarketData => serde_json::json!({
            "type": "object",
            "properties": {
                "isin": {
                    "type": "string",
                    "description": "ISIN of the security"
                },
                "period": {
                    "type": "string",
                    "enum": ["latest", "1m", "3m", "1y", "5y"],
                    "default": "latest"
                }
            },
            "required": ["isin"]
        }),
        KnownTool::ReviewDocument => serde_json::json!({
            "type": "object",
            "properties": {
                "document_id": {
                    "type": "string",
                    "description": "Identifier of a stored document, or \"attachment\" for the uploaded file"
                },
                "focus": {
                    "type": "string",
                    "description": "Optional area to focus the review on"
                },
                "produce_revision": {
                    "type": "boolean",
                    "description": "Return a revised copy of the document",
                    "default": false
                }
            },
            "required": ["document_id"]
        }),
    }
}
