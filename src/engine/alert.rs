use crate::data::{
    domain::Monto,
    event::{AlertDecision, AlertStyle, SoundTag},
};

/// Everything the alert rules look at for one UPDATE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertContext {
    pub descripcion: String,
    pub tracked: bool,
    pub is_leader: bool,
    /// The latched previous leadership; makes LOSER a one-shot.
    pub was_leader: bool,
    pub previous_best: Option<Monto>,
    pub best: Option<Monto>,
    pub renta_para_mejorar: Option<f64>,
    pub min_margin: Option<f64>,
    pub hide_below_threshold: bool,
}

/// Decides style, sound, hide flag and message for one UPDATE.
///
/// Leadership outranks price direction: WINNER while the bidder leads, LOSER
/// exactly once when the lead was just lost. Tracked items keep their tint
/// through every style. Sounds only accompany price drops, a lost lead, and
/// changes on tracked items; debouncing is the caller's job.
pub fn decide(ctx: &AlertContext) -> AlertDecision {
    let went_down = match (ctx.previous_best, ctx.best) {
        (Some(prev), Some(now)) => now < prev,
        _ => false,
    };
    let went_up = match (ctx.previous_best, ctx.best) {
        (Some(prev), Some(now)) => now > prev,
        _ => false,
    };

    let style = if ctx.is_leader {
        AlertStyle::Winner
    } else if ctx.was_leader {
        AlertStyle::Loser
    } else if went_down {
        AlertStyle::AlertDown
    } else if went_up {
        AlertStyle::AlertUp
    } else if ctx.tracked {
        AlertStyle::Tracked
    } else {
        AlertStyle::Normal
    };

    let sound = match style {
        AlertStyle::AlertDown => Some(SoundTag::PriceDrop),
        AlertStyle::Loser => Some(SoundTag::LeadLost),
        _ if ctx.tracked => Some(SoundTag::TrackedChange),
        _ => None,
    };

    let hide = ctx.hide_below_threshold
        && matches!(
            (ctx.renta_para_mejorar, ctx.min_margin),
            (Some(renta), Some(rmin)) if renta < rmin
        );

    AlertDecision {
        style,
        tracked: ctx.tracked,
        sound,
        hide,
        message: message_for(ctx, style),
    }
}

fn message_for(ctx: &AlertContext, style: AlertStyle) -> String {
    let best = ctx
        .best
        .map(|m| format!("{:.2}", m.0))
        .unwrap_or_else(|| "-".to_string());
    match style {
        AlertStyle::Winner => format!("{}: nuestra oferta lidera", ctx.descripcion),
        AlertStyle::Loser => format!("{}: perdimos el liderazgo", ctx.descripcion),
        AlertStyle::AlertDown => format!("{}: mejor oferta bajó a {best}", ctx.descripcion),
        AlertStyle::AlertUp => format!("{}: mejor oferta subió a {best}", ctx.descripcion),
        AlertStyle::Tracked | AlertStyle::Normal => {
            format!("{}: mejor oferta {best}", ctx.descripcion)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(prev: Option<f64>, now: Option<f64>) -> AlertContext {
        AlertContext {
            descripcion: "Guantes".to_string(),
            previous_best: prev.map(Monto),
            best: now.map(Monto),
            ..Default::default()
        }
    }

    #[test]
    fn price_drop_is_an_opportunity() {
        let decision = decide(&ctx(Some(100.0), Some(90.0)));
        assert_eq!(decision.style, AlertStyle::AlertDown);
        assert_eq!(decision.sound, Some(SoundTag::PriceDrop));
    }

    #[test]
    fn price_rise_alerts_up_without_sound() {
        let decision = decide(&ctx(Some(100.0), Some(110.0)));
        assert_eq!(decision.style, AlertStyle::AlertUp);
        assert_eq!(decision.sound, None);
    }

    #[test]
    fn leadership_outranks_price_direction() {
        let mut c = ctx(Some(100.0), Some(90.0));
        c.is_leader = true;
        let decision = decide(&c);
        assert_eq!(decision.style, AlertStyle::Winner);
        assert_eq!(decision.sound, None);
    }

    #[test]
    fn losing_the_lead_latches_once_with_sound() {
        let mut c = ctx(Some(100.0), Some(95.0));
        c.was_leader = true;
        let decision = decide(&c);
        assert_eq!(decision.style, AlertStyle::Loser);
        assert_eq!(decision.sound, Some(SoundTag::LeadLost));
    }

    #[test]
    fn tracked_tint_rides_on_top_of_styles() {
        let mut c = ctx(Some(100.0), Some(90.0));
        c.tracked = true;
        let decision = decide(&c);
        assert_eq!(decision.style, AlertStyle::AlertDown);
        assert!(decision.tracked);

        let mut quiet = ctx(Some(100.0), Some(100.0));
        quiet.tracked = true;
        let decision = decide(&quiet);
        assert_eq!(decision.style, AlertStyle::Tracked);
        assert_eq!(decision.sound, Some(SoundTag::TrackedChange));
    }

    #[test]
    fn hide_requires_flag_and_margin_below_minimum() {
        let mut c = ctx(Some(100.0), Some(90.0));
        c.renta_para_mejorar = Some(0.10);
        c.min_margin = Some(0.30);
        assert!(!decide(&c).hide);

        c.hide_below_threshold = true;
        assert!(decide(&c).hide);

        c.renta_para_mejorar = Some(0.35);
        assert!(!decide(&c).hide);

        c.renta_para_mejorar = None;
        assert!(!decide(&c).hide);
    }
}
