//! Worked example rule module: a three-stage crawl of a book-listing site
//! (tag page → book list → book detail). Grounded in
//! `parse/doubanbook/book.go`; not a generic extraction framework, just a
//! demonstration of how a rule module is authored against this crate's
//! `RuleTree`/`Rule`/`Context` surface.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::context::{Context, ParseResult};
use crate::error::RuleError;
use crate::request::Request;
use crate::task::{Rule, RuleTree, Task};

const TAG_RULE: &str = "tag_page";
const LIST_RULE: &str = "book_list";
const DETAIL_RULE: &str = "book_detail";

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a href="([^"]+)" class="tag">([^<]+)</a>"#).unwrap());
static LIST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<a.*?href="([^"]+)" title="([^"]+)""#).unwrap());
static AUTHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<span class="pl"> 作者</span>:[\s\S]*?<a.*?>([^<]+)</a>"#).unwrap());
static PUBLISHER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<span class="pl">出版社:</span>([^<]+)<br/>"#).unwrap());
static PAGES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<span class="pl">页数:</span> ([^<]+)<br/>"#).unwrap());
static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<span class="pl">定价:</span>([^<]+)<br/>"#).unwrap());
static SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<strong class="ll rating_num " property="v:average">([^<]+)</strong>"#).unwrap());
static INTRO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<div class="intro">[\s\S]*?<p>([^<]+)</p></div>"#).unwrap());

fn extract(body: &str, re: &Regex) -> String {
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn parse_tag_page(ctx: &Context) -> Result<ParseResult, RuleError> {
    let requests = TAG_RE
        .captures_iter(&ctx.body)
        .map(|c| ctx.req.follow_up(format!("https://book.douban.com{}", &c[1]), LIST_RULE))
        .collect();
    Ok(ParseResult::new().with_requests(requests))
}

fn parse_book_list(ctx: &Context) -> Result<ParseResult, RuleError> {
    let requests = LIST_RE
        .captures_iter(&ctx.body)
        .map(|c| {
            let req = ctx.req.follow_up(c[1].to_string(), DETAIL_RULE);
            req.tmp_data.set("book_name", Value::String(c[2].to_string()));
            req
        })
        .collect();
    Ok(ParseResult::new().with_requests(requests))
}

fn parse_book_detail(ctx: &Context) -> Result<ParseResult, RuleError> {
    let book_name = ctx.req.tmp_data.get("book_name").unwrap_or(Value::Null);
    let pages: i64 = extract(&ctx.body, &PAGES_RE).parse().unwrap_or(0);

    let data = vec![
        ("书名".to_string(), book_name),
        ("作者".to_string(), Value::String(extract(&ctx.body, &AUTHOR_RE))),
        ("页数".to_string(), Value::from(pages)),
        ("出版社".to_string(), Value::String(extract(&ctx.body, &PUBLISHER_RE))),
        ("得分".to_string(), Value::String(extract(&ctx.body, &SCORE_RE))),
        ("价格".to_string(), Value::String(extract(&ctx.body, &PRICE_RE))),
        ("简介".to_string(), Value::String(extract(&ctx.body, &INTRO_RE))),
    ];

    Ok(ParseResult::new().with_items(vec![ctx.output(data).into()]))
}

/// Build the `douban_book_list` demo task: one seed request against the tag
/// page, fanning out through the list page into per-book detail pages.
pub fn task() -> Task {
    let rule = RuleTree::new(
        || {
            Ok(vec![Request::new(
                "douban_book_list",
                "https://book.douban.com",
                TAG_RULE,
            )
            .with_priority(1)])
        },
        vec![
            (TAG_RULE, Rule::new(vec![], parse_tag_page)),
            (LIST_RULE, Rule::new(vec![], parse_book_list)),
            (
                DETAIL_RULE,
                Rule::new(
                    vec!["书名", "作者", "页数", "出版社", "得分", "价格", "简介"],
                    parse_book_detail,
                ),
            ),
        ],
    );

    Task::new("douban_book_list", "https://book.douban.com", rule)
        .with_cookie("gr_user_id=63380bb1-6e3f-4d56-aa90-9c6a7b0f102d")
        .with_wait_time(std::time::Duration::from_secs(1))
        .with_max_depth(5)
}
