use axum::response::Html;

/// Bar-chart page that polls `/api/scores`.
const LEADERBOARD_PAGE: &str = include_str!("../../../static/leaderboard.html");

pub async fn index() -> Html<&'static str> {
    Html(LEADERBOARD_PAGE)
}
