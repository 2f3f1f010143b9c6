// HTML pages, rendered from the Handlebars templates under `templates/`.
use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;

use crate::model::{Story, Student};

const PARTIALS: [(&str, &str); 2] = [
    ("header", include_str!("../templates/header.hbs")),
    ("footer", include_str!("../templates/footer.hbs")),
];

const PAGES: [(&str, &str); 4] = [
    ("login", include_str!("../templates/login.hbs")),
    ("dashboard", include_str!("../templates/dashboard.hbs")),
    ("story", include_str!("../templates/story.hbs")),
    ("error", include_str!("../templates/error.hbs")),
];

#[derive(Serialize)]
struct LoginPage {
    page_title: &'static str,
}

#[derive(Serialize)]
struct DashboardPage<'a> {
    page_title: &'static str,
    name: &'a str,
    pm_level: u32,
    focus_words: String,
    stories: Vec<StoryLink<'a>>,
}

#[derive(Serialize)]
struct StoryLink<'a> {
    index: usize,
    title: &'a str,
    date: &'a str,
}

#[derive(Serialize)]
struct StoryPage<'a> {
    page_title: &'a str,
    title: &'a str,
    date: &'a str,
    paragraphs: Vec<&'a str>,
}

#[derive(Serialize)]
struct ErrorPage<'a> {
    page_title: &'a str,
    message: &'a str,
}

/// The compiled page templates. Output is HTML-escaped by Handlebars.
pub struct Views {
    hbs: Handlebars<'static>,
}

impl Views {
    pub fn new() -> Result<Self, TemplateError> {
        let mut hbs = Handlebars::new();
        hbs.set_strict_mode(true);
        for (name, source) in PARTIALS {
            hbs.register_partial(name, source)?;
        }
        for (name, source) in PAGES {
            hbs.register_template_string(name, source)?;
        }
        Ok(Self { hbs })
    }

    pub fn login(&self) -> Result<String, RenderError> {
        self.hbs.render("login", &LoginPage { page_title: "Login" })
    }

    pub fn dashboard(&self, student: &Student) -> Result<String, RenderError> {
        let stories = student
            .stories
            .iter()
            .enumerate()
            .map(|(index, story)| StoryLink {
                index,
                title: &story.title,
                date: &story.date,
            })
            .collect();

        self.hbs.render(
            "dashboard",
            &DashboardPage {
                page_title: "Dashboard",
                name: &student.name,
                pm_level: student.pm_level,
                focus_words: student.focus_words.join(", "),
                stories,
            },
        )
    }

    pub fn story(&self, story: &Story) -> Result<String, RenderError> {
        let paragraphs = story
            .content
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .collect();

        self.hbs.render(
            "story",
            &StoryPage {
                page_title: &story.title,
                title: &story.title,
                date: &story.date,
                paragraphs,
            },
        )
    }

    pub fn error_page(&self, title: &str, message: &str) -> Result<String, RenderError> {
        self.hbs.render(
            "error",
            &ErrorPage {
                page_title: title,
                message,
            },
        )
    }
}
