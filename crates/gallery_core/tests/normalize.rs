use std::sync::Once;

use gallery_core::{absolutize_permalink, ensure_image_extension};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(engine_logging::initialize_for_tests);
}

#[test]
fn appends_default_extension_when_segment_has_none() {
    init_logging();
    assert_eq!(ensure_image_extension("http://x/img"), "http://x/img.jpg");
}

#[test]
fn keeps_existing_extension() {
    assert_eq!(ensure_image_extension("http://x/img.png"), "http://x/img.png");
}

#[test]
fn dots_in_the_host_do_not_count_as_an_extension() {
    assert_eq!(
        ensure_image_extension("http://images.example.com/abcd"),
        "http://images.example.com/abcd.jpg"
    );
}

#[test]
fn extension_lands_before_query_parameters() {
    assert_eq!(
        ensure_image_extension("http://x/img?size=large"),
        "http://x/img.jpg?size=large"
    );
}

#[test]
fn relative_paths_fall_back_to_a_string_check() {
    assert_eq!(ensure_image_extension("gallery/raw"), "gallery/raw.jpg");
    assert_eq!(ensure_image_extension("gallery/raw.gif"), "gallery/raw.gif");
}

#[test]
fn relative_permalink_is_joined_onto_the_base() {
    assert_eq!(
        absolutize_permalink("http://feed.example.com", "/p/123"),
        "http://feed.example.com/p/123"
    );
    assert_eq!(
        absolutize_permalink("http://feed.example.com", "p/123"),
        "http://feed.example.com/p/123"
    );
}

#[test]
fn absolute_permalink_is_kept() {
    assert_eq!(
        absolutize_permalink("http://feed.example.com", "http://other.example.com/p/1"),
        "http://other.example.com/p/1"
    );
}
