use serde::Deserialize;
use smallvec::SmallVec;

use crate::{
    data::{
        domain::{Monto, OfferId, ProviderId, RenglonId},
        event::{leader_of, LineItemObservation, Offer},
    },
    error::{RemateResult, WireError},
    wire::money::parse_money_opt,
};

/// Segments of the `@@`-delimited payload: offers, budget, minimum-to-beat.
const PAYLOAD_SEGMENTS: usize = 3;

// ================================================================================================
// Raw Wire Shapes
// ================================================================================================

/// The portal's XHR envelope: a single JSON object `{"d": "<payload>"}`.
#[derive(Debug, Deserialize)]
struct Envelope {
    d: String,
}

/// One offer row as the portal serializes it inside segment 0.
#[derive(Debug, Deserialize)]
struct OfferRow {
    id_oferta_subasta: i64,
    #[allow(dead_code)]
    id_renglon: i64,
    id_proveedor: i64,
    monto: f64,
    proveedor: String,
    mejor_oferta: String,
    hora: String,
    monto_a_mostrar: String,
}

impl From<OfferRow> for Offer {
    fn from(row: OfferRow) -> Self {
        Offer {
            id: OfferId(row.id_oferta_subasta.to_string()),
            provider: ProviderId(row.id_proveedor.to_string()),
            provider_label: row.proveedor,
            monto: Monto(row.monto),
            display: row.monto_a_mostrar,
            hora: row.hora,
            leader_label: row.mejor_oferta,
        }
    }
}

// ================================================================================================
// Typed Payload
// ================================================================================================

/// Parsed content of one `BuscarOfertas` response for one line item.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalPayload {
    pub offers: SmallVec<[Offer; 4]>,
    pub budget: Option<Monto>,
    pub budget_text: Option<String>,
    pub min_to_beat: Option<Monto>,
    pub min_to_beat_text: Option<String>,
}

impl PortalPayload {
    /// Parses the raw XHR body.
    ///
    /// The body is a JSON envelope whose `d` value is
    /// `"<offers JSON array>@@<budget display>@@<min display>@@"`. Anything
    /// that fails segmentation, offer-array JSON, or money parsing is a
    /// [`WireError`]; per the error taxonomy the caller logs it as WARN and
    /// skips this line item for the tick.
    pub fn parse(body: &str) -> RemateResult<Self> {
        let envelope: Envelope =
            serde_json::from_str(body).map_err(|e| WireError::Envelope(e.to_string()))?;
        Self::parse_inner(&envelope.d)
    }

    /// Parses the already-unwrapped `d` payload string.
    pub fn parse_inner(payload: &str) -> RemateResult<Self> {
        let segments: Vec<&str> = payload.split("@@").collect();
        if segments.len() < PAYLOAD_SEGMENTS {
            return Err(WireError::Segmentation {
                expected: PAYLOAD_SEGMENTS,
                found: segments.len(),
            }
            .into());
        }

        let rows: Vec<OfferRow> = if segments[0].trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(segments[0]).map_err(|e| WireError::Offers(e.to_string()))?
        };
        let offers: SmallVec<[Offer; 4]> = rows.into_iter().map(Offer::from).collect();

        let budget = parse_money_opt(segments[1])?;
        let min_to_beat = parse_money_opt(segments[2])?;

        Ok(Self {
            offers,
            budget,
            budget_text: non_blank(segments[1]),
            min_to_beat,
            min_to_beat_text: non_blank(segments[2]),
        })
    }

    /// Assembles the normalized observation for this line item.
    ///
    /// The best offer is the resolved leader of the offer book; collectors
    /// overlay the portal message and finalized flag from their own context.
    pub fn into_observation(
        self,
        id_renglon: RenglonId,
        descripcion: String,
        http_status: u16,
    ) -> LineItemObservation {
        let (best, best_text) = match leader_of(&self.offers) {
            Some(leader) => (Some(leader.monto), Some(leader.display.clone())),
            None => (None, None),
        };

        LineItemObservation {
            id_renglon,
            descripcion,
            offers: self.offers,
            best,
            best_text,
            min_to_beat: self.min_to_beat,
            min_to_beat_text: self.min_to_beat_text,
            budget: self.budget,
            budget_text: self.budget_text,
            portal_msg: None,
            finalized: false,
            http_status,
        }
    }
}

fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Cheap structural probe used by scenario validation: checks envelope and
/// `@@` segmentation without committing to full offer parsing.
pub fn probe_segmentation(body: &str) -> RemateResult<()> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| WireError::Envelope(e.to_string()))?;
    probe_inner_segmentation(&envelope.d)
}

/// Segmentation probe over an already-unwrapped `d` payload string.
pub fn probe_inner_segmentation(payload: &str) -> RemateResult<()> {
    let found = payload.split("@@").count();
    if found < PAYLOAD_SEGMENTS {
        return Err(WireError::Segmentation {
            expected: PAYLOAD_SEGMENTS,
            found,
        }
        .into());
    }
    Ok(())
}
