use crate::models::PostSummary;
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// How many authors the "top authors" rollup keeps.
pub const TOP_AUTHOR_LIMIT: usize = 5;

#[derive(Debug, Serialize, Default, PartialEq, Eq)]
pub struct EngagementTotals {
    pub posts: u64,
    pub likes: u64,
    pub views: u64,
    pub comments: u64,
}

#[derive(Debug, Serialize, Clone)]
pub struct AuthorRollup {
    pub name: String,
    pub posts: u64,
    pub likes: u64,
    pub views: u64,
    pub comments: u64,
}

#[derive(Debug, Serialize)]
pub struct HourBucket {
    pub hour: u32,
    pub count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct GrowthBucket {
    pub date: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct EngagementPoint {
    pub date: DateTime<Utc>,
    pub likes: u32,
    pub views: u32,
    pub comments: u32,
}

/// The three best-performing posts. Absent entirely when there are no posts;
/// a ranking over nothing is not a ranking.
#[derive(Debug, Serialize)]
pub struct Podium {
    pub most_liked: PostSummary,
    pub most_viewed: PostSummary,
    pub most_commented: PostSummary,
}

#[derive(Debug, Serialize)]
pub struct EngagementReport {
    pub totals: EngagementTotals,
    pub top_authors: Vec<AuthorRollup>,
    pub posts_by_hour: Vec<HourBucket>,
    pub podium: Option<Podium>,
    pub engagement_over_time: Vec<EngagementPoint>,
}

/// Aggregates a post list into the dashboard report. Every section tolerates
/// an empty input: totals come out zeroed, lists empty, podium `None`.
pub fn compute_report(posts: &[PostSummary]) -> EngagementReport {
    let mut totals = EngagementTotals { posts: posts.len() as u64, ..Default::default() };
    let mut author_stats: BTreeMap<&str, AuthorRollup> = BTreeMap::new();
    let mut hours: BTreeMap<u32, u64> = BTreeMap::new();

    for post in posts {
        totals.likes += u64::from(post.likes);
        totals.views += u64::from(post.views);
        totals.comments += u64::from(post.comment_count);

        let entry = author_stats.entry(post.author_name.as_str()).or_insert_with(|| AuthorRollup {
            name: post.author_name.clone(),
            posts: 0,
            likes: 0,
            views: 0,
            comments: 0,
        });
        entry.posts += 1;
        entry.likes += u64::from(post.likes);
        entry.views += u64::from(post.views);
        entry.comments += u64::from(post.comment_count);

        *hours.entry(post.created_at.hour()).or_insert(0) += 1;
    }

    let mut top_authors: Vec<AuthorRollup> = author_stats.into_values().collect();
    top_authors.sort_by(|a, b| b.posts.cmp(&a.posts));
    top_authors.truncate(TOP_AUTHOR_LIMIT);

    let posts_by_hour = hours.into_iter()
        .map(|(hour, count)| HourBucket { hour, count })
        .collect();

    let podium = build_podium(posts);

    let mut engagement_over_time: Vec<EngagementPoint> = posts.iter()
        .map(|post| EngagementPoint {
            date: post.created_at,
            likes: post.likes,
            views: post.views,
            comments: post.comment_count,
        })
        .collect();
    engagement_over_time.sort_by(|a, b| a.date.cmp(&b.date));

    EngagementReport { totals, top_authors, posts_by_hour, podium, engagement_over_time }
}

fn build_podium(posts: &[PostSummary]) -> Option<Podium> {
    let most_liked = posts.iter().max_by_key(|p| p.likes)?;
    let most_viewed = posts.iter().max_by_key(|p| p.views)?;
    let most_commented = posts.iter().max_by_key(|p| p.comment_count)?;
    Some(Podium {
        most_liked: most_liked.clone(),
        most_viewed: most_viewed.clone(),
        most_commented: most_commented.clone(),
    })
}

/// Buckets registration timestamps by calendar day (UTC), oldest first.
pub fn user_growth(dates: &[DateTime<Utc>]) -> Vec<GrowthBucket> {
    let mut buckets: BTreeMap<String, u64> = BTreeMap::new();
    for date in dates {
        *buckets.entry(date.format("%Y-%m-%d").to_string()).or_insert(0) += 1;
    }
    buckets.into_iter()
        .map(|(date, count)| GrowthBucket { date, count })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn summary(author_name: &str, likes: u32, views: u32, comments: u32, hour: u32) -> PostSummary {
        PostSummary {
            id: format!("{}-{}-{}", author_name, likes, views),
            title: "t".to_string(),
            short_description: "d".to_string(),
            author: "uid".to_string(),
            author_name: author_name.to_string(),
            author_profile_picture: None,
            likes,
            views,
            comment_count: comments,
            created_at: Utc.with_ymd_and_hms(2024, 3, 10, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn empty_input_yields_an_empty_report_without_panicking() {
        let report = compute_report(&[]);
        assert_eq!(report.totals, EngagementTotals::default());
        assert!(report.top_authors.is_empty());
        assert!(report.posts_by_hour.is_empty());
        assert!(report.podium.is_none());
        assert!(report.engagement_over_time.is_empty());
    }

    #[test]
    fn totals_sum_across_all_posts() {
        let posts = vec![
            summary("anna", 3, 10, 2, 9),
            summary("beka", 1, 5, 0, 14),
        ];
        let report = compute_report(&posts);
        assert_eq!(report.totals, EngagementTotals { posts: 2, likes: 4, views: 15, comments: 2 });
    }

    #[test]
    fn top_authors_rank_by_post_count_and_cut_at_five() {
        let mut posts = Vec::new();
        for (i, name) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
            // author "a" gets 7 posts, "b" 6, ... "f" 2
            for _ in 0..(7 - i) {
                posts.push(summary(name, 1, 1, 1, 12));
            }
        }
        let report = compute_report(&posts);
        assert_eq!(report.top_authors.len(), TOP_AUTHOR_LIMIT);
        assert_eq!(report.top_authors[0].name, "a");
        assert_eq!(report.top_authors[0].posts, 7);
        assert!(report.top_authors.iter().all(|r| r.name != "f"));
        assert!(report.top_authors.windows(2).all(|w| w[0].posts >= w[1].posts));
    }

    #[test]
    fn hour_histogram_counts_only_hours_that_occur() {
        let posts = vec![
            summary("anna", 0, 0, 0, 9),
            summary("anna", 0, 0, 0, 9),
            summary("beka", 0, 0, 0, 21),
        ];
        let report = compute_report(&posts);
        assert_eq!(report.posts_by_hour.len(), 2);
        assert_eq!(report.posts_by_hour[0].hour, 9);
        assert_eq!(report.posts_by_hour[0].count, 2);
        assert_eq!(report.posts_by_hour[1].hour, 21);
        assert_eq!(report.posts_by_hour[1].count, 1);
    }

    #[test]
    fn podium_picks_winners_per_dimension() {
        let posts = vec![
            summary("anna", 9, 1, 0, 8),
            summary("beka", 2, 50, 1, 9),
            summary("cira", 0, 3, 7, 10),
        ];
        let podium = compute_report(&posts).podium.unwrap();
        assert_eq!(podium.most_liked.author_name, "anna");
        assert_eq!(podium.most_viewed.author_name, "beka");
        assert_eq!(podium.most_commented.author_name, "cira");
    }

    #[test]
    fn growth_buckets_by_calendar_day() {
        let dates = vec![
            Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 10, 23, 59, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 12, 0, 0, 0).unwrap(),
        ];
        let growth = user_growth(&dates);
        assert_eq!(growth, vec![
            GrowthBucket { date: "2024-03-10".to_string(), count: 2 },
            GrowthBucket { date: "2024-03-12".to_string(), count: 1 },
        ]);
    }

    #[test]
    fn growth_of_no_users_is_empty() {
        assert!(user_growth(&[]).is_empty());
    }
}
