// Instruction interpretation: classification, extraction and vision context

use tello_copilot::config::CopilotConfig;
use tello_copilot::interpreter::extract::ParameterExtractor;
use tello_copilot::interpreter::intent::Intent;
use tello_copilot::interpreter::Interpreter;
use tello_copilot::{Command, Direction, FlipDirection, ManualInput, ParsedCommand, Rotation, TelemetryQuery};

fn exec(command: Command) -> ParsedCommand {
    ParsedCommand::Exec(command)
}

fn forward(cm: u32) -> ParsedCommand {
    exec(Command::Move {
        direction: Direction::Forward,
        cm,
    })
}

fn cw(degrees: u32) -> ParsedCommand {
    exec(Command::Rotate {
        rotation: Rotation::Clockwise,
        degrees,
    })
}

#[test]
fn move_forward_with_centimeters() {
    let interpreter = Interpreter::default();

    assert_eq!(interpreter.synthesize("move forward 120cm", None), vec![forward(120)]);
}

#[test]
fn turn_left_without_number_rotates_counter_clockwise_by_default() {
    let interpreter = Interpreter::default();

    assert_eq!(
        interpreter.synthesize("turn left", None),
        vec![exec(Command::Rotate {
            rotation: Rotation::CounterClockwise,
            degrees: 90
        })]
    );
}

#[test]
fn explore_emits_fixed_sequence() {
    let interpreter = Interpreter::default();
    let expected = vec![
        ParsedCommand::comment("Exploration sequence"),
        cw(90),
        forward(30),
        cw(90),
        forward(30),
    ];

    assert_eq!(interpreter.synthesize("explore the area", None), expected);
    // Exploration ignores the observation
    assert_eq!(
        interpreter.synthesize("patrol", Some("A wall and an obstacle right ahead")),
        expected
    );
}

#[test]
fn follow_person_moves_forward() {
    let interpreter = Interpreter::default();

    assert_eq!(
        interpreter.synthesize("follow", Some("I see a person near the wall")),
        vec![ParsedCommand::comment("Following person detected in view"), forward(30)]
    );
}

#[test]
fn emergency_is_sole_entry() {
    let interpreter = Interpreter::default();

    assert_eq!(
        interpreter.synthesize("emergency stop now", None),
        vec![exec(Command::Emergency)]
    );
    assert_eq!(
        interpreter.synthesize("move forward 100cm and then STOP", None),
        vec![exec(Command::Emergency)]
    );
    assert_eq!(interpreter.synthesize("abort the takeoff", None), vec![exec(Command::Emergency)]);
}

#[test]
fn centimeters_are_clamped_for_every_direction() {
    let interpreter = Interpreter::default();
    let directions = [
        ("forward", Direction::Forward),
        ("back", Direction::Back),
        ("left", Direction::Left),
        ("right", Direction::Right),
        ("up", Direction::Up),
        ("down", Direction::Down),
    ];

    for (keyword, direction) in directions {
        for number in [0u64, 1, 19, 20, 21, 120, 499, 500, 501, 10_000, 4_000_000_000] {
            let plan = interpreter.synthesize(&format!("go {} {}cm", keyword, number), None);
            let cm = number.clamp(20, 500) as u32;
            assert_eq!(plan, vec![exec(Command::Move { direction, cm })], "{} {}cm", keyword, number);
        }
    }
}

#[test]
fn meters_are_converted_and_clamped() {
    let extractor = ParameterExtractor::default();

    assert_eq!(extractor.distance("go up 2m", 50), 200);
    assert_eq!(extractor.distance("go up 1.5 meters", 50), 150);
    assert_eq!(extractor.distance("forward 10m", 50), 500);
    assert_eq!(extractor.distance("forward 0.1m", 50), 20);
    assert_eq!(extractor.distance("forward 3 metres", 50), 300);
}

#[test]
fn other_distance_units() {
    let extractor = ParameterExtractor::default();

    assert_eq!(extractor.distance("forward 3ft", 50), 90);
    assert_eq!(extractor.distance("forward 2 feet", 50), 60);
    assert_eq!(extractor.distance("forward 25 units", 50), 25);
    assert_eq!(extractor.distance("forward 3 steps", 50), 20);
    // Bare number
    assert_eq!(extractor.distance("forward 75", 50), 75);
    // No number at all
    assert_eq!(extractor.distance("forward", 50), 50);
    // Minutes are not meters
    assert_eq!(extractor.distance("forward for 5 minutes", 50), 20);
    // Oversized numbers saturate
    assert_eq!(extractor.distance("forward 99999999999999999999999999cm", 50), 500);
}

#[test]
fn angles() {
    let interpreter = Interpreter::default();
    let extractor = ParameterExtractor::default();

    assert_eq!(interpreter.synthesize("rotate right", None), vec![cw(90)]);
    assert_eq!(interpreter.synthesize("rotate right 45 degrees", None), vec![cw(45)]);
    assert_eq!(extractor.angle("turn right 720°", 90), 360);
    assert_eq!(extractor.angle("turn left 0 degrees", 90), 1);
    assert_eq!(extractor.angle("turn left 30 deg", 90), 30);
    assert_eq!(extractor.angle("spin left", 90), 90);
}

#[test]
fn turn_around_is_half_turn() {
    let interpreter = Interpreter::default();

    assert_eq!(interpreter.synthesize("turn around", None), vec![cw(180)]);
    assert_eq!(interpreter.synthesize("spin", None), vec![cw(180)]);
    assert_eq!(
        interpreter.synthesize("spin left", None),
        vec![exec(Command::Rotate {
            rotation: Rotation::CounterClockwise,
            degrees: 90
        })]
    );
}

#[test]
fn movement_wins_over_rotation() {
    let interpreter = Interpreter::default();

    assert_eq!(interpreter.classify("move forward then turn right"), Some(Intent::MoveForward));
    assert_eq!(interpreter.synthesize("move forward then turn right", None), vec![forward(50)]);
    assert_eq!(interpreter.classify("come back"), Some(Intent::MoveBack));
}

#[test]
fn flight_and_flips() {
    let interpreter = Interpreter::default();

    assert_eq!(interpreter.synthesize("take off", None), vec![exec(Command::Takeoff)]);
    assert_eq!(interpreter.synthesize("launch!", None), vec![exec(Command::Takeoff)]);
    assert_eq!(interpreter.synthesize("please land now", None), vec![exec(Command::Land)]);
    assert_eq!(
        interpreter.synthesize("do a flip", None),
        vec![exec(Command::Flip(FlipDirection::Forward))]
    );
    assert_eq!(
        interpreter.synthesize("flip back", None),
        vec![exec(Command::Flip(FlipDirection::Back))]
    );
    assert_eq!(
        interpreter.synthesize("flip left", None),
        vec![exec(Command::Flip(FlipDirection::Left))]
    );
}

#[test]
fn uninterpretable_instruction_yields_nothing() {
    let interpreter = Interpreter::default();

    assert!(interpreter.synthesize("sing a song", None).is_empty());
    assert!(interpreter.synthesize("", None).is_empty());
    // Keywords only match whole words
    assert!(interpreter.synthesize("uplifting backstory", None).is_empty());
}

#[test]
fn synthesis_is_idempotent() {
    let interpreter = Interpreter::default();

    for text in ["move forward 120cm", "turn left", "explore", "follow him", "sing"] {
        let observation = Some("an object on the table");
        assert_eq!(
            interpreter.synthesize(text, observation),
            interpreter.synthesize(text, observation)
        );
    }
}

#[test]
fn vision_context() {
    let interpreter = Interpreter::default();

    assert_eq!(
        interpreter.synthesize("track it", Some("There is an Object on the table")),
        vec![ParsedCommand::comment("Moving towards detected object"), forward(20)]
    );
    assert_eq!(
        interpreter.synthesize("avoid", Some("A wall is very close")),
        vec![
            ParsedCommand::comment("Avoiding obstacle"),
            exec(Command::Move {
                direction: Direction::Back,
                cm: 50
            })
        ]
    );
    assert!(interpreter.synthesize("stay away", Some("Clear sky")).is_empty());
    assert!(interpreter.synthesize("follow", Some("An empty room")).is_empty());
    assert!(interpreter.synthesize("chase", None).is_empty());
}

#[test]
fn configured_bounds_and_keywords() {
    let config = CopilotConfig::from_toml_str(
        r#"
        [safety]
        max_distance = 300
        emergency_words = ["mayday"]

        [[keywords]]
        intent = "move_up"
        keywords = ["climb"]
        "#,
    )
    .unwrap();
    let interpreter = Interpreter::new(&config);

    assert_eq!(
        interpreter.synthesize("climb 10m", None),
        vec![exec(Command::Move {
            direction: Direction::Up,
            cm: 300
        })]
    );
    // Not in the table anymore
    assert!(interpreter.synthesize("forward", None).is_empty());
    assert_eq!(interpreter.synthesize("mayday", None), vec![exec(Command::Emergency)]);
}

#[test]
fn command_text_form() {
    let command: Command = "forward 120".parse().unwrap();
    assert_eq!(
        command,
        Command::Move {
            direction: Direction::Forward,
            cm: 120
        }
    );

    assert_eq!("move back 30".parse::<Command>().unwrap().to_string(), "back 30");
    assert_eq!("rotate ccw 45".parse::<Command>().unwrap().to_string(), "ccw 45");
    assert_eq!("flip r".parse::<Command>().unwrap(), Command::Flip(FlipDirection::Right));
    assert_eq!(
        "rc 10 -200 0 300".parse::<Command>().unwrap(),
        Command::Rc {
            lr: 10,
            fb: -100,
            ud: 0,
            yaw: 100
        }
    );

    assert!("forward".parse::<Command>().is_err());
    assert!("cw 90 now".parse::<Command>().is_err());
    assert!("flip x".parse::<Command>().is_err());
    assert!("dance".parse::<Command>().is_err());

    assert_eq!(ParsedCommand::comment("hello").to_string(), "# hello");
}

#[test]
fn manual_input() {
    assert_eq!(
        "battery?".parse::<ManualInput>().unwrap(),
        ManualInput::Query(TelemetryQuery::Battery)
    );
    assert_eq!(
        "Temp?".parse::<ManualInput>().unwrap(),
        ManualInput::Query(TelemetryQuery::Temperature)
    );
    assert_eq!(
        "land".parse::<ManualInput>().unwrap(),
        ManualInput::Command(Command::Land)
    );
    assert!("altitude?".parse::<ManualInput>().is_err());
}
