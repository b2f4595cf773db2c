use serde::{Deserialize, Serialize};

/// Language used for the labels shown by the widget and the directory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ja,
    En,
}

impl Locale {
    /// `lang` attribute of the rendered pages
    pub fn lang(&self) -> &'static str {
        match self {
            Locale::Ja => "ja",
            Locale::En => "en",
        }
    }

    pub fn connecting(&self) -> &'static str {
        match self {
            Locale::Ja => "接続中...",
            Locale::En => "Connecting...",
        }
    }

    /// Shown when a call page link carries no contact name
    pub fn person_in_charge(&self) -> &'static str {
        match self {
            Locale::Ja => "担当者",
            Locale::En => "Representative",
        }
    }

    pub fn unclassified(&self) -> &'static str {
        match self {
            Locale::Ja => "未分類",
            Locale::En => "Unclassified",
        }
    }

    pub fn contact_list_failed(&self, file_name: &str) -> String {
        match self {
            Locale::Ja => format!("{} の読み込みに失敗しました。", file_name),
            Locale::En => format!("Failed to load {}.", file_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAppearance {
    /// Green phone icon, pressing it places a call
    #[default]
    Call,
    /// Red rotated phone icon, pressing it hangs up
    HangUp,
}

impl ButtonAppearance {
    pub fn css_classes(&self) -> &'static str {
        match self {
            ButtonAppearance::Call => "bg-green-500 hover:bg-green-600",
            ButtonAppearance::HangUp => "bg-red-500 hover:bg-red-600",
        }
    }
}

/// Everything the call page renders: the button and the status line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallView {
    pub button: ButtonAppearance,
    pub button_class: String,
    pub status_text: String,
    pub elapsed_seconds: u64,
}

impl CallView {
    pub fn idle() -> Self {
        Self {
            button: ButtonAppearance::Call,
            button_class: ButtonAppearance::Call.css_classes().to_string(),
            status_text: String::new(),
            elapsed_seconds: 0,
        }
    }

    pub fn set_button(&mut self, button: ButtonAppearance) {
        self.button = button;
        self.button_class = button.css_classes().to_string();
    }

    /// Zero the counter and show `00:00`
    pub fn reset_elapsed(&mut self) {
        self.elapsed_seconds = 0;
        self.status_text = format_elapsed(0);
    }

    pub fn tick(&mut self) {
        self.elapsed_seconds += 1;
        self.status_text = format_elapsed(self.elapsed_seconds);
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::idle()
    }
}

/// `MM:SS`, minutes keep growing past 59.
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
