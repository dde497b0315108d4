//! Czech numeral agreement for the handful of words the report uses.

use std::str::FromStr;

use crate::error::ReportError;

/// Dictionary form of a report word. Keys with a numeric suffix are fixed
/// case forms (`-6` locative, `-7` instrumental) used after a preposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lemma {
    Zucastneny,
    Editor,
    Aktivni,
    Nove,
    Registrovany,
    Byte,
    Pridany,
    Odebrany,
    EditaceLocative,
    ProvedenaLocative,
    UzivatelInstrumental,
    Editace,
    Provedena,
    Editovany,
    Clanek,
    Zalozeny,
    Stavajici,
    Soubor,
    Nahrany,
}

impl Lemma {
    pub const ALL: [Lemma; 19] = [
        Lemma::Zucastneny,
        Lemma::Editor,
        Lemma::Aktivni,
        Lemma::Nove,
        Lemma::Registrovany,
        Lemma::Byte,
        Lemma::Pridany,
        Lemma::Odebrany,
        Lemma::EditaceLocative,
        Lemma::ProvedenaLocative,
        Lemma::UzivatelInstrumental,
        Lemma::Editace,
        Lemma::Provedena,
        Lemma::Editovany,
        Lemma::Clanek,
        Lemma::Zalozeny,
        Lemma::Stavajici,
        Lemma::Soubor,
        Lemma::Nahrany,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Lemma::Zucastneny => "zúčastněný",
            Lemma::Editor => "editor",
            Lemma::Aktivni => "aktivní",
            Lemma::Nove => "nově",
            Lemma::Registrovany => "registrovaný",
            Lemma::Byte => "byte",
            Lemma::Pridany => "přidaný",
            Lemma::Odebrany => "odebraný",
            Lemma::EditaceLocative => "editace-6",
            Lemma::ProvedenaLocative => "provedená-6",
            Lemma::UzivatelInstrumental => "uživatel-7",
            Lemma::Editace => "editace",
            Lemma::Provedena => "provedená",
            Lemma::Editovany => "editovaný",
            Lemma::Clanek => "článek",
            Lemma::Zalozeny => "založený",
            Lemma::Stavajici => "stávající",
            Lemma::Soubor => "soubor",
            Lemma::Nahrany => "nahraný",
        }
    }

    /// The inflected form agreeing with `count`.
    pub fn form(self, count: i64) -> &'static str {
        let one = count == 1;
        let few = (2..=4).contains(&count);
        let one_to_four = (1..=4).contains(&count);
        match self {
            Lemma::Zucastneny => pick(one, few, "zúčastněný", "zúčastnění", "zúčastněných"),
            Lemma::Editor => pick(one, few, "editor", "editoři", "editorů"),
            Lemma::Aktivni => pick_two(one_to_four, "aktivní", "aktivních"),
            Lemma::Nove => "nově",
            Lemma::Registrovany => pick(
                one,
                few,
                "registrovaný",
                "registrovaní",
                "registrovaných",
            ),
            Lemma::Byte => pick(one, few, "byte", "byty", "bytů"),
            Lemma::Pridany => pick(one, few, "přidaný", "přidané", "přidaných"),
            Lemma::Odebrany => pick(one, few, "odebraný", "odebrané", "odebraných"),
            Lemma::EditaceLocative => pick_two(one, "editaci", "editacích"),
            Lemma::ProvedenaLocative => pick_two(one, "provedené", "provedených"),
            Lemma::UzivatelInstrumental => pick_two(one, "uživatelem", "uživateli"),
            Lemma::Editace => pick_two(one_to_four, "editace", "editací"),
            Lemma::Provedena => pick(one, few, "provedená", "provedené", "provedených"),
            Lemma::Editovany => pick(one, few, "editovaný", "editované", "editovaných"),
            Lemma::Clanek => pick(one, few, "článek", "články", "článků"),
            Lemma::Zalozeny => pick(one, few, "založený", "založené", "založených"),
            Lemma::Stavajici => pick_two(one_to_four, "stávající", "stávajících"),
            Lemma::Soubor => pick(one, few, "soubor", "soubory", "souborů"),
            Lemma::Nahrany => pick(one, few, "nahraný", "nahrané", "nahraných"),
        }
    }
}

impl FromStr for Lemma {
    type Err = ReportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Lemma::ALL
            .into_iter()
            .find(|lemma| lemma.key() == value)
            .ok_or_else(|| ReportError::UnknownLemma(value.to_string()))
    }
}

fn pick(
    one: bool,
    few: bool,
    singular: &'static str,
    paucal: &'static str,
    plural: &'static str,
) -> &'static str {
    if one {
        singular
    } else if few {
        paucal
    } else {
        plural
    }
}

fn pick_two(first: bool, when: &'static str, otherwise: &'static str) -> &'static str {
    if first { when } else { otherwise }
}

/// Inflect every lemma in `phrase` for `count`, optionally prefixed by the
/// number. The number goes through `{{subst:formatnum:}}` so the wiki applies
/// Czech digit grouping when the page is saved.
pub fn inflect(
    count: i64,
    phrase: &str,
    prepend: bool,
    bold: bool,
) -> Result<String, ReportError> {
    let words = phrase
        .split_whitespace()
        .map(|key| key.parse::<Lemma>().map(|lemma| lemma.form(count)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut output = String::new();
    if prepend {
        let marker = if bold { "'''" } else { "" };
        output.push_str(&format!("{marker}{{{{subst:formatnum:{count}}}}}{marker} "));
    }
    output.push_str(&words.join(" "));
    Ok(output)
}

/// `inflect` with the number prepended in bold, as every report line uses it.
pub fn counted(count: i64, phrase: &str) -> Result<String, ReportError> {
    inflect(count, phrase, true, true)
}
