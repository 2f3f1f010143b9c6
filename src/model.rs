//src/model.rs
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Reading level assigned to a new student.
pub const DEFAULT_PM_LEVEL: u32 = 5;

/// Most recent stories kept per student.
pub const MAX_STORIES: usize = 10;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

const TITLE_PREFIX: &str = "Title: ";

pub fn default_focus_words() -> Vec<String> {
    ["happy", "friend", "school"]
        .iter()
        .map(|w| w.to_string())
        .collect()
}

fn default_pm_level() -> u32 {
    DEFAULT_PM_LEVEL
}

/// The whole persisted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Store {
    #[serde(default)]
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub name: String,
    #[serde(default = "default_pm_level")]
    pub pm_level: u32, // reading difficulty
    #[serde(default = "default_focus_words")]
    pub focus_words: Vec<String>,
    #[serde(default)]
    pub stories: Vec<Story>, // oldest first
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub title: String,
    pub content: String,
    pub date: String, // local time, "YYYY-MM-DD HH:MM"
}

impl Store {
    /// First student whose name matches exactly.
    pub fn find_student(&self, name: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.name == name)
    }

    pub fn find_student_mut(&mut self, name: &str) -> Option<&mut Student> {
        self.students.iter_mut().find(|s| s.name == name)
    }

    /// Look up a student, appending a default one if absent.
    /// The flag is true when a record was created.
    pub fn find_or_create(&mut self, name: &str) -> (&Student, bool) {
        match self.students.iter().position(|s| s.name == name) {
            Some(index) => (&self.students[index], false),
            None => {
                self.students.push(Student::new(name.to_string()));
                let last = self.students.len() - 1;
                (&self.students[last], true)
            }
        }
    }
}

impl Student {
    pub fn new(name: String) -> Self {
        Self {
            name,
            pm_level: DEFAULT_PM_LEVEL,
            focus_words: default_focus_words(),
            stories: Vec::new(),
        }
    }

    /// Append a story, keep only the most recent `MAX_STORIES`, and return
    /// the position of the new story in the truncated list.
    pub fn push_story(&mut self, story: Story) -> usize {
        self.stories.push(story);
        if self.stories.len() > MAX_STORIES {
            let excess = self.stories.len() - MAX_STORIES;
            self.stories.drain(..excess);
        }
        self.stories.len() - 1
    }

    pub fn story(&self, index: usize) -> Option<&Story> {
        self.stories.get(index)
    }
}

impl Story {
    /// Build a story record from raw generated text.
    pub fn from_generated(content: String, now: DateTime<Local>) -> Self {
        Self {
            title: extract_title(&content),
            date: now.format(DATE_FORMAT).to_string(),
            content,
        }
    }
}

/// First line of the text with any `"Title: "` marker removed.
pub fn extract_title(content: &str) -> String {
    let first_line = content.split('\n').next().unwrap_or_default();
    first_line.replace(TITLE_PREFIX, "")
}
