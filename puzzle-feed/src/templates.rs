//! Built-in social stories a parent can share as a post.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoryTemplate {
    pub id: u8,
    pub title: &'static str,
    pub content: &'static str,
}

pub const TEMPLATES: &[StoryTemplate] = &[
    StoryTemplate {
        id: 1,
        title: "Going to the Doctor",
        content: "We go to the doctor. We sit and wait. The doctor is nice and helps me.",
    },
    StoryTemplate {
        id: 2,
        title: "Trying New Food",
        content: "Sometimes I try new food. It's okay to take small bites. I can say 'no thank you'.",
    },
    StoryTemplate {
        id: 3,
        title: "Using My Words",
        content: "When I'm upset, I can use my words. I can say 'I need a break' or 'I feel mad'.",
    },
];

/// Looks a template up by id or by title, ignoring case.
pub fn find(query: &str) -> Option<&'static StoryTemplate> {
    let query = query.trim();
    TEMPLATES.iter().find(|template| {
        query.parse::<u8>().ok() == Some(template.id) || template.title.eq_ignore_ascii_case(query)
    })
}
